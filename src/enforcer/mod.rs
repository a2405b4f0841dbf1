//! Packet-filter engine abstraction.
//!
//! The enforcement set and its rules live inside the kernel's packet filter.
//! [`FilterEngine`] is the only way the rest of the crate touches them:
//! [`NftablesEngine`] drives the real `nft` binary, [`MemoryEngine`] is an
//! in-process stand-in with the same semantics for tests.

mod memory;
mod nftables;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

pub use memory::MemoryEngine;
pub use nftables::{parse_set_elements, NftablesEngine};

use crate::cmd_abstraction::{args_to_strings, CommandExecutor, SystemExecutor};
use crate::config::Config;
use crate::error::BlocksyncError;
use crate::prefix::NetworkPrefix;
use crate::rules::EnforcementRule;

/// Location of the enforcement set inside the packet filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetRef {
    /// Table family (`inet`, `ip`)
    pub family: String,
    pub table: String,
    pub set: String,
}

impl SetRef {
    pub fn new(family: &str, table: &str, set: &str) -> Self {
        Self {
            family: family.to_string(),
            table: table.to_string(),
            set: set.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.table_family, &config.table, &config.set)
    }

    pub(crate) fn set_missing(&self) -> BlocksyncError {
        BlocksyncError::SetMissing {
            family: self.family.clone(),
            table: self.table.clone(),
            set: self.set.clone(),
        }
    }

    pub(crate) fn chain_missing(&self, chain: &str) -> BlocksyncError {
        BlocksyncError::ChainMissing {
            family: self.family.clone(),
            table: self.table.clone(),
            chain: chain.to_string(),
        }
    }
}

impl Default for SetRef {
    fn default() -> Self {
        Self::new("inet", "filter", "blacklist")
    }
}

/// Declarative operations against the packet-filtering engine.
///
/// Each call is a single bounded operation; callers never retry. Element
/// insertion is all-or-nothing per call, as with `nft add element`.
#[async_trait]
pub trait FilterEngine: Send + Sync {
    /// Table/set this engine operates on
    fn set_ref(&self) -> &SetRef;

    /// Create the table if it does not exist.
    async fn ensure_table(&self) -> Result<()>;

    /// Create the IPv4 interval set if it does not exist.
    ///
    /// `auto_merge` requests merging of overlapping intervals; engines that
    /// cannot honour it return an error.
    async fn create_set(&self, auto_merge: bool) -> Result<()>;

    async fn set_exists(&self) -> Result<bool>;

    /// Insert elements in one operation. Existing members are not an error.
    async fn add_elements(&self, elements: &[NetworkPrefix]) -> Result<()>;

    /// Delete one element. Fails if the element is absent.
    async fn remove_element(&self, element: &NetworkPrefix) -> Result<()>;

    /// Raw set members as the engine prints them.
    ///
    /// Fails with [`BlocksyncError::SetMissing`] when the set does not exist.
    async fn list_elements(&self) -> Result<Vec<String>>;

    /// Rule lines of a chain, one per rule.
    ///
    /// Fails with [`BlocksyncError::ChainMissing`] when the chain does not exist.
    async fn list_rules(&self, chain: &str) -> Result<Vec<String>>;

    /// Insert a rule at the head of a chain.
    async fn insert_rule(&self, chain: &str, rule: &EnforcementRule) -> Result<()>;
}

/// Resolve the `nft` binary, preferring the usual sbin locations.
pub fn nft_path() -> &'static str {
    ["/usr/sbin/nft", "/sbin/nft"]
        .into_iter()
        .find(|p| Path::new(p).exists())
        .unwrap_or("nft")
}

/// Verify that `nft` can be executed.
pub fn check_nft_available<E: CommandExecutor>(executor: &E) -> Result<()> {
    match executor.execute(nft_path(), &args_to_strings(&["--version"])) {
        Ok(output) if output.success => Ok(()),
        Ok(output) => Err(BlocksyncError::BackendNotAvailable(format!(
            "nft --version failed: {}",
            output.stderr.trim()
        ))
        .into()),
        Err(e) => Err(BlocksyncError::BackendNotAvailable(format!(
            "nft not found ({}). Install the nftables package.",
            e
        ))
        .into()),
    }
}

/// Create the nftables engine for the configured table and set.
pub fn create_engine(config: &Config) -> Result<Box<dyn FilterEngine>> {
    let executor = SystemExecutor::new();
    check_nft_available(&executor)?;
    Ok(Box::new(NftablesEngine::new(
        executor,
        SetRef::from_config(config),
    )))
}

/// Check if running as root (effective UID == 0)
///
/// Every operation needs CAP_NET_ADMIN; UID 0 covers the usual sudo case.
pub fn check_root() -> Result<()> {
    // SAFETY: geteuid() has no preconditions, never fails and touches no state.
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        return Err(BlocksyncError::Permission(
            "this operation requires root privileges. Please run with sudo.".to_string(),
        )
        .into());
    }
    Ok(())
}
