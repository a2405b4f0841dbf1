//! One synchronisation run: fetch every source, merge into the set,
//! ensure the drop rules.
//!
//! Sources are isolated from each other. A source that cannot be fetched is
//! reported and skipped; the others still load. Only the setup phase (table
//! and set creation) aborts the run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use crate::activity::ActivityLog;
use crate::config::FeedSource;
use crate::enforcer::FilterEngine;
use crate::fetcher::{fetch_all, parse_source, FeedFetch};
use crate::reconciler::SetReconciler;
use crate::rules::{RuleEnforcer, RuleOutcome, RuleReport};
use crate::signal::ShutdownToken;
use crate::utils::{format_count, format_count_with_separator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    /// Some work failed, some succeeded
    Partial,
    Failed,
}

impl SyncOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Success => "success",
            SyncOutcome::Partial => "partial",
            SyncOutcome::Failed => "failed",
        }
    }
}

/// What happened to one source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub outcome: SyncOutcome,
    /// Valid prefixes kept after the cap
    pub parsed: usize,
    /// Malformed data lines
    pub rejected: usize,
    pub truncated: bool,
    pub added: usize,
    pub already_present: usize,
    /// Prefixes the engine refused
    pub failed: usize,
    /// Fetch failure reason
    pub error: Option<String>,
}

impl SourceReport {
    fn fetch_failed(name: &str, error: String) -> Self {
        Self {
            name: name.to_string(),
            outcome: SyncOutcome::Failed,
            parsed: 0,
            rejected: 0,
            truncated: false,
            added: 0,
            already_present: 0,
            failed: 0,
            error: Some(error),
        }
    }
}

/// Result of [`Synchronizer::run`].
#[derive(Debug)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub sources: Vec<SourceReport>,
    pub rules: Vec<RuleReport>,
    /// Members after the run; `None` in dry-run mode or when unreadable
    pub total_entries: Option<usize>,
    /// A shutdown request stopped the run before every source was processed
    pub cancelled: bool,
}

impl SyncReport {
    /// `Failed` only when every source failed; any other failure is `Partial`.
    pub fn outcome(&self) -> SyncOutcome {
        let failed = self
            .sources
            .iter()
            .filter(|s| s.outcome == SyncOutcome::Failed)
            .count();
        if !self.sources.is_empty() && failed == self.sources.len() {
            return SyncOutcome::Failed;
        }
        let degraded = failed > 0
            || self.cancelled
            || self.sources.iter().any(|s| s.outcome == SyncOutcome::Partial)
            || self.rules.iter().any(|r| !r.is_ok());
        if degraded {
            SyncOutcome::Partial
        } else {
            SyncOutcome::Success
        }
    }

    pub fn added(&self) -> usize {
        self.sources.iter().map(|s| s.added).sum()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sources:")?;
        for source in &self.sources {
            match source.outcome {
                SyncOutcome::Failed => writeln!(
                    f,
                    "  [FAIL] {}: {}",
                    source.name,
                    source.error.as_deref().unwrap_or("failed")
                )?,
                outcome => {
                    let tag = if outcome == SyncOutcome::Success { "[OK]  " } else { "[WARN]" };
                    write!(f, "  {} {}: {} parsed", tag, source.name, format_count(source.parsed))?;
                    if !self.dry_run {
                        write!(
                            f,
                            ", {} added, {} already present",
                            format_count(source.added),
                            format_count(source.already_present)
                        )?;
                    }
                    if source.failed > 0 {
                        write!(f, ", {} failed", source.failed)?;
                    }
                    if source.rejected > 0 {
                        write!(f, ", {} malformed", source.rejected)?;
                    }
                    if source.truncated {
                        write!(f, " (capped)")?;
                    }
                    writeln!(f)?;
                }
            }
        }
        if self.cancelled {
            writeln!(f, "  [WARN] interrupted, remaining sources skipped")?;
        }

        if !self.rules.is_empty() {
            writeln!(f, "Rules:")?;
            for rule in &self.rules {
                match &rule.result {
                    Ok(RuleOutcome::Inserted) => writeln!(f, "  [OK]   {}: inserted", rule.chain)?,
                    Ok(RuleOutcome::AlreadyPresent) => {
                        writeln!(f, "  [OK]   {}: already present", rule.chain)?
                    }
                    Err(e) => writeln!(f, "  [FAIL] {}: {}", rule.chain, e)?,
                }
            }
        }

        match self.total_entries {
            Some(total) => write!(f, "Total entries: {}", format_count_with_separator(total)),
            None if self.dry_run => write!(f, "Dry run: enforcement set not modified"),
            None => write!(f, "Total entries: unknown"),
        }
    }
}

/// Drives one run against a filter engine.
pub struct Synchronizer<'a> {
    fetcher: &'a dyn FeedFetch,
    engine: &'a dyn FilterEngine,
    chains: &'a [String],
    label: &'a str,
    activity: Option<&'a ActivityLog>,
    shutdown: ShutdownToken,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        fetcher: &'a dyn FeedFetch,
        engine: &'a dyn FilterEngine,
        chains: &'a [String],
        label: &'a str,
    ) -> Self {
        Self {
            fetcher,
            engine,
            chains,
            label,
            activity: None,
            shutdown: ShutdownToken::new(),
        }
    }

    pub fn with_activity_log(mut self, log: &'a ActivityLog) -> Self {
        self.activity = Some(log);
        self
    }

    pub fn with_shutdown(mut self, token: ShutdownToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Run once over `sources`, in order.
    ///
    /// With `dry_run` the feeds are fetched and parsed but the engine is
    /// never touched.
    pub async fn run(&self, sources: &[&FeedSource], dry_run: bool) -> Result<SyncReport> {
        let started_at = Utc::now();
        let reconciler = SetReconciler::new(self.engine);

        if !dry_run {
            reconciler
                .ensure_set_exists()
                .await
                .context("Failed to prepare the enforcement set")?;
        }

        info!("Fetching {} sources...", sources.len());
        let fetched = fetch_all(self.fetcher, sources).await;

        let mut reports = Vec::with_capacity(fetched.len());
        let mut cancelled = false;
        for (source, body) in fetched {
            if self.shutdown.is_cancelled() {
                warn!("Shutdown requested, skipping remaining sources");
                cancelled = true;
                break;
            }

            let report = match body {
                Err(e) => {
                    warn!("Source {} failed: {:#}", source.name, e);
                    SourceReport::fetch_failed(&source.name, format!("{:#}", e))
                }
                Ok(body) => {
                    let parsed = parse_source(source, &body);
                    let mut report = SourceReport {
                        name: source.name.clone(),
                        outcome: SyncOutcome::Success,
                        parsed: parsed.prefixes.len(),
                        rejected: parsed.rejected,
                        truncated: parsed.truncated,
                        added: 0,
                        already_present: 0,
                        failed: 0,
                        error: None,
                    };
                    if !dry_run {
                        let added = reconciler.add_many(parsed.prefixes).await;
                        report.added = added.added;
                        report.already_present = added.already_present;
                        report.failed = added.failed;
                        if added.failed > 0 {
                            report.outcome = SyncOutcome::Partial;
                        }
                        info!(
                            "{}: {} added, {} already present",
                            source.name,
                            format_count(added.added),
                            format_count(added.already_present)
                        );
                    }
                    report
                }
            };
            self.record_source(&report, dry_run);
            reports.push(report);
        }

        let (rules, total_entries) = if dry_run {
            (Vec::new(), None)
        } else {
            let rules = RuleEnforcer::new(self.engine, self.label)
                .ensure_all(self.chains)
                .await;
            let total = match reconciler.member_count().await {
                Ok(total) => Some(total),
                Err(e) => {
                    warn!("Could not count set members: {:#}", e);
                    None
                }
            };
            (rules, total)
        };

        let report = SyncReport {
            started_at,
            dry_run,
            sources: reports,
            rules,
            total_entries,
            cancelled,
        };
        self.record_run(&report);
        Ok(report)
    }

    fn record_source(&self, report: &SourceReport, dry_run: bool) {
        let Some(log) = self.activity else { return };
        if dry_run {
            return;
        }
        let mut fields = vec![
            ("source", report.name.clone()),
            ("outcome", report.outcome.as_str().to_string()),
        ];
        match &report.error {
            Some(error) => fields.push(("error", error.clone())),
            None => {
                fields.push(("added", report.added.to_string()));
                fields.push(("already_present", report.already_present.to_string()));
                fields.push(("failed", report.failed.to_string()));
                fields.push(("rejected", report.rejected.to_string()));
            }
        }
        log.record("sync_source", &fields);
    }

    fn record_run(&self, report: &SyncReport) {
        let Some(log) = self.activity else { return };
        if report.dry_run {
            return;
        }
        let mut fields = vec![
            ("outcome", report.outcome().as_str().to_string()),
            ("added", report.added().to_string()),
        ];
        if let Some(total) = report.total_entries {
            fields.push(("total", total.to_string()));
        }
        if report.cancelled {
            fields.push(("cancelled", "true".to_string()));
        }
        log.record("sync", &fields);
    }
}
