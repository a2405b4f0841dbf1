//! # blocksync - threat-feed blacklist synchronisation for nftables
//!
//! Pulls public threat feeds, extracts IPv4 addresses and CIDR blocks, and
//! merges them into a single nftables set. One drop rule per configured
//! chain references the set.
//!
//! Synchronisation is strictly additive: entries are never removed by a
//! feed run, so operator-added entries survive every resync. Removal is a
//! manual operation only.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  CLI (clap)                                              │
//! │    └── update, add, remove, list, status, test           │
//! ├──────────────────────────────────────────────────────────┤
//! │  Sync run                                                │
//! │    ├── Fetcher (reqwest + rustls, bounded concurrency)   │
//! │    ├── Prefix parser (strict IPv4/CIDR validation)       │
//! │    ├── Set reconciler (additive, chunked inserts)        │
//! │    └── Rule enforcer (one labelled drop rule per chain)  │
//! ├──────────────────────────────────────────────────────────┤
//! │  FilterEngine trait                                      │
//! │    ├── NftablesEngine (nft via CommandExecutor)          │
//! │    └── MemoryEngine (in-process)                         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use blocksync::config::Config;
//! use blocksync::enforcer::{check_root, create_engine};
//! use blocksync::fetcher::Fetcher;
//! use blocksync::sync::Synchronizer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     check_root()?;
//!     let config = Config::load("/etc/blocksync/config.yaml")?;
//!
//!     let engine = create_engine(&config)?;
//!     let fetcher = Fetcher::new()?;
//!     let report = Synchronizer::new(&fetcher, engine.as_ref(), &config.chains, &config.rule_label)
//!         .run(&config.enabled_feeds(), false)
//!         .await?;
//!
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`activity`] - Append-only activity log
//! - [`cli`] - Command-line interface definitions
//! - [`cmd_abstraction`] - Command execution abstraction for testing
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`enforcer`] - Packet-filter engine abstraction (nftables, in-memory)
//! - [`error`] - Typed errors
//! - [`fetcher`] - HTTP client for downloading feeds
//! - [`lock`] - File locking for overlapping update prevention
//! - [`prefix`] - IPv4 address/CIDR extraction and validation
//! - [`reconciler`] - Additive set membership
//! - [`rules`] - Drop rule enforcement
//! - [`signal`] - Graceful shutdown signal handling
//! - [`status`] - Read-only status reporting
//! - [`sync`] - One synchronisation run
//! - [`utils`] - Formatting helpers

pub mod activity;
pub mod cli;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod fetcher;
pub mod lock;
pub mod prefix;
pub mod reconciler;
pub mod rules;
pub mod signal;
pub mod status;
pub mod sync;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use error::BlocksyncError;
pub use prefix::NetworkPrefix;
