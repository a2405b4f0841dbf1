//! Update command implementation.

use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};

use super::load_config;
use crate::activity::ActivityLog;
use crate::enforcer::{check_root, create_engine};
use crate::fetcher::Fetcher;
use crate::lock::LockGuard;
use crate::signal::ShutdownGuard;
use crate::sync::{SyncOutcome, Synchronizer};

/// Run the update command
pub async fn run(dry_run: bool, config_path: &Path) -> Result<()> {
    check_root()?;
    let config = load_config(config_path)?;

    let _lock = LockGuard::acquire(&config.lock_file)?;
    let shutdown = ShutdownGuard::new();

    let sources = config.enabled_feeds();
    if sources.is_empty() {
        warn!("No feeds enabled. Check your configuration.");
    }

    if dry_run {
        info!("Dry run: feeds are fetched and parsed, the firewall is left untouched");
    }
    info!("Updating blacklist from {} feeds...", sources.len());

    let engine = create_engine(&config)?;
    let fetcher = Fetcher::new()?;
    let log = ActivityLog::new(&config.activity_log);

    let report = Synchronizer::new(&fetcher, engine.as_ref(), &config.chains, &config.rule_label)
        .with_activity_log(&log)
        .with_shutdown(shutdown.token())
        .run(&sources, dry_run)
        .await?;

    println!();
    println!("{}", report);
    println!();

    match report.outcome() {
        SyncOutcome::Failed => anyhow::bail!("Every feed failed; the blacklist was not updated"),
        SyncOutcome::Partial => warn!("Update completed with errors"),
        SyncOutcome::Success => info!("Update completed"),
    }
    Ok(())
}
