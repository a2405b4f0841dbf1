//! Status command implementation.

use anyhow::{Context, Result};
use std::path::Path;

use super::load_config;
use crate::enforcer::{check_root, create_engine};
use crate::status::StatusReport;

/// Run the status command
pub async fn run(json: bool, config_path: &Path) -> Result<()> {
    check_root()?;
    let config = load_config(config_path)?;
    let engine = create_engine(&config)?;

    let report = StatusReport::collect(engine.as_ref(), &config.chains, &config.rule_label).await;

    if json {
        let out = serde_json::to_string_pretty(&report).context("Failed to serialize status")?;
        println!("{}", out);
    } else {
        println!();
        print!("{}", report);
        println!("Feeds: {} enabled", config.enabled_feeds().len());
        println!();
    }
    Ok(())
}
