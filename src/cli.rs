//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "blocksync")]
#[command(author, version, about = "Threat-feed blacklist synchronisation for nftables")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Quiet mode (for cron/systemd timer)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch every enabled feed and merge it into the blacklist
    Update {
        /// Fetch and parse only; leave the firewall untouched
        #[arg(long)]
        dry_run: bool,
    },

    /// Add an address or CIDR range to the blacklist
    Add {
        /// IPv4 address or CIDR (e.g. 192.0.2.1 or 198.51.100.0/24)
        prefix: String,
    },

    /// Remove an address or CIDR range from the blacklist
    Remove {
        /// Entry exactly as it was added
        prefix: String,
    },

    /// List blacklist entries
    List,

    /// Show set and rule status
    Status {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },

    /// Check whether an address is blacklisted
    Test {
        /// IPv4 address to check
        ip: String,
    },
}
