//! In-memory engine with nftables-like semantics.
//!
//! Used by tests and by anything that needs to exercise reconciliation
//! without a kernel. Failure modes of the real engine (rejected elements,
//! missing chains, no auto-merge support) can be switched on per instance.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{FilterEngine, SetRef};
use crate::error::BlocksyncError;
use crate::prefix::NetworkPrefix;
use crate::rules::EnforcementRule;

#[derive(Debug, Default)]
struct MemoryState {
    table: bool,
    set: Option<BTreeSet<String>>,
    chains: HashMap<String, Vec<String>>,
    rejected_elements: HashSet<String>,
    auto_merge_unsupported: bool,
    add_calls: usize,
}

/// In-memory [`FilterEngine`].
#[derive(Debug)]
pub struct MemoryEngine {
    set_ref: SetRef,
    state: Mutex<MemoryState>,
}

impl MemoryEngine {
    /// Engine without table, set or chains.
    pub fn new(set_ref: SetRef) -> Self {
        Self {
            set_ref,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Engine for `inet filter blacklist` with base chains `input` and `forward`.
    pub fn with_base_chains() -> Self {
        Self::new(SetRef::default())
            .with_chain("input")
            .with_chain("forward")
    }

    /// Add an (empty) base chain.
    pub fn with_chain(self, chain: &str) -> Self {
        {
            let mut state = self.state();
            state.table = true;
            state.chains.entry(chain.to_string()).or_default();
        }
        self
    }

    /// Make every insert containing `element` fail.
    pub fn reject_element(self, element: &str) -> Self {
        self.state().rejected_elements.insert(element.to_string());
        self
    }

    /// Refuse sets created with the auto-merge hint.
    pub fn without_auto_merge(self) -> Self {
        self.state().auto_merge_unsupported = true;
        self
    }

    /// Current members.
    pub fn elements(&self) -> BTreeSet<String> {
        self.state().set.clone().unwrap_or_default()
    }

    /// Rules currently installed on a chain.
    pub fn rules(&self, chain: &str) -> Vec<String> {
        self.state().chains.get(chain).cloned().unwrap_or_default()
    }

    /// Number of `add_elements` calls made so far.
    pub fn add_calls(&self) -> usize {
        self.state().add_calls
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::with_base_chains()
    }
}

#[async_trait]
impl FilterEngine for MemoryEngine {
    fn set_ref(&self) -> &SetRef {
        &self.set_ref
    }

    async fn ensure_table(&self) -> Result<()> {
        self.state().table = true;
        Ok(())
    }

    async fn create_set(&self, auto_merge: bool) -> Result<()> {
        let mut state = self.state();
        if !state.table {
            return Err(BlocksyncError::Firewall("No such file or directory (table)".into()).into());
        }
        if auto_merge && state.auto_merge_unsupported {
            return Err(BlocksyncError::Firewall("syntax error, unexpected auto-merge".into()).into());
        }
        state.set.get_or_insert_with(BTreeSet::new);
        Ok(())
    }

    async fn set_exists(&self) -> Result<bool> {
        Ok(self.state().set.is_some())
    }

    async fn add_elements(&self, elements: &[NetworkPrefix]) -> Result<()> {
        let mut state = self.state();
        state.add_calls += 1;
        // stored the way nft lists them: /32 collapsed, host bits masked
        let rendered: Vec<String> = elements.iter().map(NetworkPrefix::set_element).collect();
        if let Some(bad) = rendered.iter().find(|e| state.rejected_elements.contains(*e)) {
            return Err(BlocksyncError::Firewall(format!("Could not process rule: {}", bad)).into());
        }
        let set = state.set.as_mut().ok_or_else(|| self.set_ref.set_missing())?;
        set.extend(rendered);
        Ok(())
    }

    async fn remove_element(&self, element: &NetworkPrefix) -> Result<()> {
        let mut state = self.state();
        let set = state.set.as_mut().ok_or_else(|| self.set_ref.set_missing())?;
        if !set.remove(&element.set_element()) {
            return Err(BlocksyncError::Firewall(format!(
                "Could not process rule: No such file or directory ({})",
                element
            ))
            .into());
        }
        Ok(())
    }

    async fn list_elements(&self) -> Result<Vec<String>> {
        let state = self.state();
        let set = state.set.as_ref().ok_or_else(|| self.set_ref.set_missing())?;
        Ok(set.iter().cloned().collect())
    }

    async fn list_rules(&self, chain: &str) -> Result<Vec<String>> {
        self.state()
            .chains
            .get(chain)
            .cloned()
            .ok_or_else(|| self.set_ref.chain_missing(chain).into())
    }

    async fn insert_rule(&self, chain: &str, rule: &EnforcementRule) -> Result<()> {
        let mut state = self.state();
        let rules = state
            .chains
            .get_mut(chain)
            .ok_or_else(|| self.set_ref.chain_missing(chain))?;
        rules.insert(0, rule.listing());
        Ok(())
    }
}
