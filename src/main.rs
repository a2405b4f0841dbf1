//! blocksync - threat-feed blacklist synchronisation for nftables

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use blocksync::cli::{Cli, Commands};
use blocksync::commands;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Update { dry_run } => commands::update::run(dry_run, &cli.config).await,
        Commands::Add { prefix } => commands::add::run(&prefix, &cli.config).await,
        Commands::Remove { prefix } => commands::remove::run(&prefix, &cli.config).await,
        Commands::List => commands::list::run(&cli.config).await,
        Commands::Status { json } => commands::status::run(json, &cli.config).await,
        Commands::Test { ip } => commands::check::run(&ip, &cli.config).await,
    }
}
