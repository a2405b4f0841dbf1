//! Error types for blocksync.

use thiserror::Error;

use crate::prefix::PrefixError;

#[derive(Error, Debug)]
pub enum BlocksyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Firewall error: {0}")]
    Firewall(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Invalid prefix: {0}")]
    InvalidPrefix(#[from] PrefixError),

    #[error(
        "Enforcement set '{set}' not found in table {family} {table}.\n\
         Run 'blocksync update' to create it."
    )]
    SetMissing {
        family: String,
        table: String,
        set: String,
    },

    #[error(
        "Chain '{chain}' not found in table {family} {table}.\n\
         The base firewall must define this chain before blacklist rules can be attached."
    )]
    ChainMissing {
        family: String,
        table: String,
        chain: String,
    },

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),
}
