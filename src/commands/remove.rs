//! Remove command implementation.

use anyhow::Result;
use std::path::Path;

use super::{load_config, parse_prefix, require_set};
use crate::activity::ActivityLog;
use crate::enforcer::{check_root, create_engine, FilterEngine};
use crate::prefix::NetworkPrefix;
use crate::reconciler::{RemoveOutcome, SetReconciler};
use crate::utils::format_count_with_separator;

/// Run the remove command
pub async fn run(input: &str, config_path: &Path) -> Result<()> {
    let prefix = parse_prefix(input)?;
    check_root()?;
    let config = load_config(config_path)?;
    let engine = create_engine(&config)?;
    let log = ActivityLog::new(&config.activity_log);

    let (outcome, total) = execute(engine.as_ref(), &prefix, Some(&log)).await?;
    match outcome {
        RemoveOutcome::Removed => println!("[OK] Removed {}", prefix),
        RemoveOutcome::NotPresent => println!("[WARN] {} was not blacklisted", prefix),
    }
    println!("     Blacklist now holds {} entries", format_count_with_separator(total));
    Ok(())
}

/// Remove from an existing set; returns the outcome and the new member count.
///
/// Only an exact textual match is removed; an address inside a listed
/// range is not carved out of it.
pub async fn execute(
    engine: &dyn FilterEngine,
    prefix: &NetworkPrefix,
    log: Option<&ActivityLog>,
) -> Result<(RemoveOutcome, usize)> {
    require_set(engine).await?;

    let reconciler = SetReconciler::new(engine);
    let outcome = reconciler.remove(prefix).await?;
    let total = reconciler.member_count().await?;

    if let Some(log) = log {
        let result = match outcome {
            RemoveOutcome::Removed => "removed",
            RemoveOutcome::NotPresent => "not_present",
        };
        log.record(
            "remove",
            &[
                ("prefix", prefix.to_string()),
                ("result", result.to_string()),
                ("total", total.to_string()),
            ],
        );
    }
    Ok((outcome, total))
}
