//! Read-only view of the enforcement set and its rules.

use serde::Serialize;
use std::fmt;

use crate::enforcer::FilterEngine;
use crate::error::BlocksyncError;
use crate::rules::EnforcementRule;
use crate::utils::format_count_with_separator;

/// State of the enforcement set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SetStatus {
    NotConfigured,
    Present {
        total: usize,
        /// Single addresses
        addresses: usize,
        /// CIDR blocks and merged intervals
        ranges: usize,
    },
    Unknown {
        reason: String,
    },
}

/// State of the drop rule on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RuleStatus {
    Present {
        packets: Option<u64>,
        bytes: Option<u64>,
    },
    Absent,
    ChainMissing,
    Unknown {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainStatus {
    pub chain: String,
    pub rule: RuleStatus,
}

/// Snapshot of set and rule state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub family: String,
    pub table: String,
    pub set_name: String,
    pub set: SetStatus,
    pub chains: Vec<ChainStatus>,
}

impl StatusReport {
    /// Query the engine. Absent objects are reported, never raised.
    pub async fn collect(engine: &dyn FilterEngine, chains: &[String], label: &str) -> Self {
        let set_ref = engine.set_ref();

        let set = match engine.list_elements().await {
            Ok(elements) => {
                let ranges = elements
                    .iter()
                    .filter(|e| e.contains('/') || e.contains('-'))
                    .count();
                SetStatus::Present {
                    total: elements.len(),
                    addresses: elements.len() - ranges,
                    ranges,
                }
            }
            Err(e) => match e.downcast_ref::<BlocksyncError>() {
                Some(BlocksyncError::SetMissing { .. }) => SetStatus::NotConfigured,
                _ => SetStatus::Unknown {
                    reason: format!("{:#}", e),
                },
            },
        };

        let mut chain_statuses = Vec::with_capacity(chains.len());
        for chain in chains {
            let rule = EnforcementRule::new(chain, &set_ref.set, label);
            let status = match engine.list_rules(chain).await {
                Ok(lines) => match lines.iter().find(|l| rule.matches(l)) {
                    Some(line) => RuleStatus::Present {
                        packets: extract_number_after(line, "packets"),
                        bytes: extract_number_after(line, "bytes"),
                    },
                    None => RuleStatus::Absent,
                },
                Err(e) => match e.downcast_ref::<BlocksyncError>() {
                    Some(BlocksyncError::ChainMissing { .. }) => RuleStatus::ChainMissing,
                    _ => RuleStatus::Unknown {
                        reason: format!("{:#}", e),
                    },
                },
            };
            chain_statuses.push(ChainStatus {
                chain: chain.clone(),
                rule: status,
            });
        }

        Self {
            family: set_ref.family.clone(),
            table: set_ref.table.clone(),
            set_name: set_ref.set.clone(),
            set,
            chains: chain_statuses,
        }
    }

    /// Member count, if the set exists.
    pub fn total(&self) -> Option<usize> {
        match self.set {
            SetStatus::Present { total, .. } => Some(total),
            _ => None,
        }
    }

    /// Set present and every chain carries the rule.
    pub fn is_fully_enforced(&self) -> bool {
        matches!(self.set, SetStatus::Present { .. })
            && self
                .chains
                .iter()
                .all(|c| matches!(c.rule, RuleStatus::Present { .. }))
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Table: {} {}", self.family, self.table)?;
        match &self.set {
            SetStatus::Present {
                total,
                addresses,
                ranges,
            } => {
                writeln!(f, "Set {}: {} entries", self.set_name, format_count_with_separator(*total))?;
                writeln!(f, "  Single addresses: {}", format_count_with_separator(*addresses))?;
                writeln!(f, "  Ranges (CIDR):    {}", format_count_with_separator(*ranges))?;
            }
            SetStatus::NotConfigured => {
                writeln!(f, "Set {}: not configured (run 'blocksync update')", self.set_name)?
            }
            SetStatus::Unknown { reason } => writeln!(f, "Set {}: unknown ({})", self.set_name, reason)?,
        }

        writeln!(f, "Rules:")?;
        for chain in &self.chains {
            match &chain.rule {
                RuleStatus::Present { packets, .. } => match packets {
                    Some(n) => writeln!(
                        f,
                        "  {:<10} active ({} packets dropped)",
                        chain.chain,
                        format_count_with_separator(*n as usize)
                    )?,
                    None => writeln!(f, "  {:<10} active", chain.chain)?,
                },
                RuleStatus::Absent => writeln!(f, "  {:<10} missing", chain.chain)?,
                RuleStatus::ChainMissing => {
                    writeln!(f, "  {:<10} chain not configured", chain.chain)?
                }
                RuleStatus::Unknown { reason } => {
                    writeln!(f, "  {:<10} unknown ({})", chain.chain, reason)?
                }
            }
        }
        Ok(())
    }
}

/// Extract a number after a keyword in a string
fn extract_number_after(s: &str, keyword: &str) -> Option<u64> {
    let idx = s.find(keyword)?;
    let after = &s[idx + keyword.len()..];
    let num_str: String = after
        .chars()
        .skip_while(|c| c.is_whitespace())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    num_str.parse().ok()
}
