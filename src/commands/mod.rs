//! CLI command implementations.
//!
//! Each command has a `run` entry point that validates its arguments, checks
//! privileges, loads the configuration and binds the nftables engine, and an
//! engine-generic core that does the work.

pub mod add;
pub mod check;
pub mod list;
pub mod remove;
pub mod status;
pub mod update;

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::enforcer::FilterEngine;
use crate::error::BlocksyncError;
use crate::prefix::NetworkPrefix;

/// Load the configuration, falling back to built-in defaults.
pub(crate) fn load_config(config_path: &Path) -> Result<Config> {
    Config::load_or_default(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))
}

/// Validate operator input.
pub(crate) fn parse_prefix(input: &str) -> Result<NetworkPrefix> {
    input
        .parse::<NetworkPrefix>()
        .map_err(|e| BlocksyncError::InvalidPrefix(e).into())
}

/// Manual commands never create the set; that is `update`'s job.
pub(crate) async fn require_set(engine: &dyn FilterEngine) -> Result<()> {
    if engine.set_exists().await? {
        Ok(())
    } else {
        Err(engine.set_ref().set_missing().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcer::MemoryEngine;

    #[test]
    fn test_parse_prefix_is_typed() {
        let err = parse_prefix("256.1.1.1").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BlocksyncError>(),
            Some(BlocksyncError::InvalidPrefix(_))
        ));
        assert!(parse_prefix("10.0.0.0/8").is_ok());
    }

    #[tokio::test]
    async fn test_require_set() {
        let engine = MemoryEngine::with_base_chains();
        let err = require_set(&engine).await.unwrap_err();
        assert!(err.to_string().contains("blocksync update"));

        engine.create_set(true).await.unwrap();
        assert!(require_set(&engine).await.is_ok());
    }
}
