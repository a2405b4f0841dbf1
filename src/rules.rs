//! Drop rules binding the enforcement set to filter chains.
//!
//! Exactly one rule per chain references the set. Existing rules are
//! recognised by set reference, drop verdict and comment label, so repeated
//! runs never stack duplicates.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::enforcer::FilterEngine;
use crate::error::BlocksyncError;

/// Verdict applied to matching traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Drop,
}

impl RuleAction {
    fn keyword(self) -> &'static str {
        match self {
            RuleAction::Drop => "drop",
        }
    }
}

/// A source-address rule on one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementRule {
    pub chain: String,
    pub action: RuleAction,
    pub set: String,
    pub label: String,
}

impl EnforcementRule {
    pub fn new(chain: &str, set: &str, label: &str) -> Self {
        Self {
            chain: chain.to_string(),
            action: RuleAction::Drop,
            set: set.to_string(),
            label: label.to_string(),
        }
    }

    /// Rule body as nft arguments (after `insert rule <family> <table> <chain>`).
    pub fn nft_args(&self) -> Vec<String> {
        vec![
            "ip".to_string(),
            "saddr".to_string(),
            format!("@{}", self.set),
            "counter".to_string(),
            self.action.keyword().to_string(),
            "comment".to_string(),
            format!("\"{}\"", self.label),
        ]
    }

    /// The rule as `nft list chain` prints it right after insertion.
    pub fn listing(&self) -> String {
        format!(
            "ip saddr @{} counter packets 0 bytes 0 {} comment \"{}\"",
            self.set,
            self.action.keyword(),
            self.label
        )
    }

    /// Whether a listed rule line is this rule.
    pub fn matches(&self, line: &str) -> bool {
        let set_ref = format!("@{}", self.set);
        let references_set = line.split_whitespace().any(|t| t == set_ref);
        let has_verdict = line.split_whitespace().any(|t| t == self.action.keyword());
        references_set && has_verdict && line.contains(&format!("comment \"{}\"", self.label))
    }
}

impl fmt::Display for EnforcementRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nft_args().join(" "))
    }
}

/// Result of ensuring one chain's rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOutcome {
    AlreadyPresent,
    Inserted,
}

/// Per-chain result of [`RuleEnforcer::ensure_all`].
#[derive(Debug)]
pub struct RuleReport {
    pub chain: String,
    pub result: Result<RuleOutcome, BlocksyncError>,
}

impl RuleReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Ensures the drop rule exists on each chain.
pub struct RuleEnforcer<'a> {
    engine: &'a dyn FilterEngine,
    label: String,
}

impl<'a> RuleEnforcer<'a> {
    pub fn new(engine: &'a dyn FilterEngine, label: &str) -> Self {
        Self {
            engine,
            label: label.to_string(),
        }
    }

    /// Rule this enforcer maintains on `chain`.
    pub fn rule_for(&self, chain: &str) -> EnforcementRule {
        EnforcementRule::new(chain, &self.engine.set_ref().set, &self.label)
    }

    /// Insert the rule on `chain` unless an identical one is present.
    pub async fn ensure_rule(&self, chain: &str) -> Result<RuleOutcome, BlocksyncError> {
        let rule = self.rule_for(chain);

        let existing = self.engine.list_rules(chain).await.map_err(classify)?;
        if existing.iter().any(|line| rule.matches(line)) {
            debug!("Rule already present on chain {}", chain);
            return Ok(RuleOutcome::AlreadyPresent);
        }

        self.engine
            .insert_rule(chain, &rule)
            .await
            .map_err(classify)?;
        info!("Inserted drop rule for @{} on chain {}", rule.set, chain);
        Ok(RuleOutcome::Inserted)
    }

    /// Ensure the rule on every chain; one failing chain does not stop the others.
    pub async fn ensure_all(&self, chains: &[String]) -> Vec<RuleReport> {
        let mut reports = Vec::with_capacity(chains.len());
        for chain in chains {
            let result = self.ensure_rule(chain).await;
            if let Err(e) = &result {
                match e {
                    BlocksyncError::ChainMissing { .. } => {
                        warn!("Configuration dependency missing: {}", e)
                    }
                    _ => warn!("Failed to ensure rule on chain {}: {}", chain, e),
                }
            }
            reports.push(RuleReport {
                chain: chain.clone(),
                result,
            });
        }
        reports
    }
}

/// Keep typed engine errors, wrap anything else as a firewall error.
fn classify(err: anyhow::Error) -> BlocksyncError {
    match err.downcast::<BlocksyncError>() {
        Ok(typed) => typed,
        Err(other) => BlocksyncError::Firewall(format!("{:#}", other)),
    }
}
