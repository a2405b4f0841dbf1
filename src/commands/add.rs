//! Add command implementation.

use anyhow::Result;
use std::path::Path;

use super::{load_config, parse_prefix, require_set};
use crate::activity::ActivityLog;
use crate::enforcer::{check_root, create_engine, FilterEngine};
use crate::prefix::NetworkPrefix;
use crate::reconciler::{AddOutcome, SetReconciler};
use crate::utils::format_count_with_separator;

/// Run the add command
pub async fn run(input: &str, config_path: &Path) -> Result<()> {
    let prefix = parse_prefix(input)?;
    check_root()?;
    let config = load_config(config_path)?;
    let engine = create_engine(&config)?;
    let log = ActivityLog::new(&config.activity_log);

    let (outcome, total) = execute(engine.as_ref(), &prefix, Some(&log)).await?;
    match outcome {
        AddOutcome::Added => println!("[OK] Added {}", prefix),
        AddOutcome::AlreadyPresent => println!("[WARN] {} is already blacklisted", prefix),
    }
    println!("     Blacklist now holds {} entries", format_count_with_separator(total));
    Ok(())
}

/// Add to an existing set; returns the outcome and the new member count.
pub async fn execute(
    engine: &dyn FilterEngine,
    prefix: &NetworkPrefix,
    log: Option<&ActivityLog>,
) -> Result<(AddOutcome, usize)> {
    require_set(engine).await?;

    let reconciler = SetReconciler::new(engine);
    let outcome = reconciler.add(prefix).await?;
    let total = reconciler.member_count().await?;

    if let Some(log) = log {
        let result = match outcome {
            AddOutcome::Added => "added",
            AddOutcome::AlreadyPresent => "already_present",
        };
        log.record(
            "add",
            &[
                ("prefix", prefix.to_string()),
                ("result", result.to_string()),
                ("total", total.to_string()),
            ],
        );
    }
    Ok((outcome, total))
}
