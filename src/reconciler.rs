//! Membership lifecycle of the enforcement set.
//!
//! Feed synchronisation only ever adds: the set carries no record of who
//! inserted an element, so a resync that flushed or diffed the set would
//! also evict operator-managed entries. Removal exists only for the manual
//! path.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

use crate::enforcer::FilterEngine;
use crate::prefix::NetworkPrefix;

/// Elements inserted per engine call during bulk loads
pub const ADD_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoveOutcome {
    Removed,
    NotPresent,
}

/// Counts from one bulk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AddManyReport {
    pub requested: usize,
    pub added: usize,
    /// Already in the set, or repeated within the batch
    pub already_present: usize,
    pub failed: usize,
}

impl AddManyReport {
    pub fn merge(&mut self, other: &AddManyReport) {
        self.requested += other.requested;
        self.added += other.added;
        self.already_present += other.already_present;
        self.failed += other.failed;
    }
}

/// Reconciles prefixes into the enforcement set.
pub struct SetReconciler<'a> {
    engine: &'a dyn FilterEngine,
}

impl<'a> SetReconciler<'a> {
    pub fn new(engine: &'a dyn FilterEngine) -> Self {
        Self { engine }
    }

    /// Create table and set if needed.
    ///
    /// The set is requested with auto-merge so overlapping intervals can
    /// coexist; engines without that capability get a plain interval set.
    pub async fn ensure_set_exists(&self) -> Result<()> {
        let set_ref = self.engine.set_ref();
        self.engine
            .ensure_table()
            .await
            .with_context(|| format!("Failed to create table {} {}", set_ref.family, set_ref.table))?;

        if self.engine.set_exists().await? {
            debug!("Set {} already exists", set_ref.set);
            return Ok(());
        }

        match self.engine.create_set(true).await {
            Ok(()) => info!("Created set {} (interval, auto-merge)", set_ref.set),
            Err(e) => {
                warn!(
                    "Auto-merge not supported by the filtering engine ({}), creating plain interval set",
                    e
                );
                self.engine
                    .create_set(false)
                    .await
                    .with_context(|| format!("Failed to create set {}", set_ref.set))?;
                info!("Created set {} (interval)", set_ref.set);
            }
        }
        Ok(())
    }

    pub async fn set_exists(&self) -> Result<bool> {
        self.engine.set_exists().await
    }

    /// Add prefixes; each failure costs only its own element.
    ///
    /// Members already present are skipped. Pending elements go in chunks of
    /// [`ADD_CHUNK_SIZE`]; a rejected chunk is replayed element by element.
    pub async fn add_many<I>(&self, prefixes: I) -> AddManyReport
    where
        I: IntoIterator<Item = NetworkPrefix>,
    {
        let present: HashSet<String> = match self.engine.list_elements().await {
            Ok(elements) => elements.into_iter().collect(),
            Err(e) => {
                warn!("Could not read current members before bulk add: {:#}", e);
                HashSet::new()
            }
        };

        let mut report = AddManyReport::default();
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for prefix in prefixes {
            report.requested += 1;
            let element = prefix.set_element();
            if present.contains(&element) || !seen.insert(element) {
                report.already_present += 1;
            } else {
                pending.push(prefix);
            }
        }

        for chunk in pending.chunks(ADD_CHUNK_SIZE) {
            match self.engine.add_elements(chunk).await {
                Ok(()) => report.added += chunk.len(),
                Err(e) => {
                    debug!(
                        "Chunk of {} elements rejected ({:#}), inserting individually",
                        chunk.len(),
                        e
                    );
                    for prefix in chunk {
                        match self.engine.add_elements(std::slice::from_ref(prefix)).await {
                            Ok(()) => report.added += 1,
                            Err(e) => {
                                warn!("Failed to add {}: {:#}", prefix, e);
                                report.failed += 1;
                            }
                        }
                    }
                }
            }
        }

        report
    }

    /// Add one prefix; a duplicate is a warning, not an error.
    pub async fn add(&self, prefix: &NetworkPrefix) -> Result<AddOutcome> {
        if self.contains(prefix).await? {
            warn!("{} is already in the blacklist", prefix);
            return Ok(AddOutcome::AlreadyPresent);
        }
        self.engine
            .add_elements(std::slice::from_ref(prefix))
            .await
            .with_context(|| format!("Failed to add {}", prefix))?;
        info!("Added {} to the blacklist", prefix);
        Ok(AddOutcome::Added)
    }

    /// Remove one prefix; an absent prefix is a warning and a no-op.
    pub async fn remove(&self, prefix: &NetworkPrefix) -> Result<RemoveOutcome> {
        if !self.contains(prefix).await? {
            warn!("{} is not in the blacklist", prefix);
            return Ok(RemoveOutcome::NotPresent);
        }
        self.engine
            .remove_element(prefix)
            .await
            .with_context(|| format!("Failed to remove {}", prefix))?;
        info!("Removed {} from the blacklist", prefix);
        Ok(RemoveOutcome::Removed)
    }

    /// Exact membership in the engine's element form.
    ///
    /// `1.2.3.4/32` and `1.2.3.4` are the same member; an address inside a
    /// listed range is not.
    pub async fn contains(&self, prefix: &NetworkPrefix) -> Result<bool> {
        let needle = prefix.set_element();
        Ok(self
            .engine
            .list_elements()
            .await?
            .iter()
            .any(|e| *e == needle))
    }

    /// Current members that are canonical prefixes.
    ///
    /// Merged intervals printed as `a-b` are not prefixes and are left out.
    pub async fn snapshot(&self) -> Result<BTreeSet<NetworkPrefix>> {
        let elements = self.engine.list_elements().await?;
        Ok(elements
            .iter()
            .filter_map(|e| match e.parse() {
                Ok(prefix) => Some(prefix),
                Err(_) => {
                    debug!("Skipping non-prefix set element {}", e);
                    None
                }
            })
            .collect())
    }

    /// Number of elements the engine reports, prefixes or not.
    pub async fn member_count(&self) -> Result<usize> {
        Ok(self.engine.list_elements().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcer::{MemoryEngine, SetRef};

    fn p(s: &str) -> NetworkPrefix {
        s.parse().unwrap()
    }

    async fn ready_engine() -> MemoryEngine {
        let engine = MemoryEngine::with_base_chains();
        SetReconciler::new(&engine).ensure_set_exists().await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_ensure_set_exists_idempotent() {
        let engine = MemoryEngine::new(SetRef::default());
        let reconciler = SetReconciler::new(&engine);
        reconciler.ensure_set_exists().await.unwrap();
        reconciler.add(&p("10.0.0.0/8")).await.unwrap();
        reconciler.ensure_set_exists().await.unwrap();
        assert_eq!(reconciler.member_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ensure_set_exists_without_auto_merge() {
        let engine = MemoryEngine::with_base_chains().without_auto_merge();
        let reconciler = SetReconciler::new(&engine);
        reconciler.ensure_set_exists().await.unwrap();
        assert!(reconciler.set_exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_add_idempotent() {
        let engine = ready_engine().await;
        let reconciler = SetReconciler::new(&engine);

        assert_eq!(reconciler.add(&p("192.0.2.1")).await.unwrap(), AddOutcome::Added);
        assert_eq!(
            reconciler.add(&p("192.0.2.1")).await.unwrap(),
            AddOutcome::AlreadyPresent
        );
        assert_eq!(reconciler.member_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_and_remove_slash_32() {
        let engine = ready_engine().await;
        let reconciler = SetReconciler::new(&engine);

        assert_eq!(reconciler.add(&p("192.0.2.1/32")).await.unwrap(), AddOutcome::Added);
        assert_eq!(
            reconciler.add(&p("192.0.2.1/32")).await.unwrap(),
            AddOutcome::AlreadyPresent
        );
        assert_eq!(
            reconciler.add(&p("192.0.2.1")).await.unwrap(),
            AddOutcome::AlreadyPresent
        );
        assert_eq!(
            reconciler.remove(&p("192.0.2.1/32")).await.unwrap(),
            RemoveOutcome::Removed
        );
        assert_eq!(reconciler.member_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_host_bits_match_masked_member() {
        let engine = ready_engine().await;
        let reconciler = SetReconciler::new(&engine);

        assert_eq!(reconciler.add(&p("10.0.0.1/8")).await.unwrap(), AddOutcome::Added);
        assert!(engine.elements().contains("10.0.0.0/8"));
        assert_eq!(
            reconciler.add(&p("10.0.0.1/8")).await.unwrap(),
            AddOutcome::AlreadyPresent
        );
        assert!(reconciler.contains(&p("10.0.0.0/8")).await.unwrap());
        assert_eq!(
            reconciler.remove(&p("10.0.0.1/8")).await.unwrap(),
            RemoveOutcome::Removed
        );
    }

    #[tokio::test]
    async fn test_add_many_counts_equivalent_forms_once() {
        let engine = ready_engine().await;
        let reconciler = SetReconciler::new(&engine);
        reconciler.add(&p("198.51.100.5")).await.unwrap();

        let report = reconciler
            .add_many(vec![p("198.51.100.5/32"), p("10.0.0.1/8"), p("10.0.0.0/8")])
            .await;
        assert_eq!(report.added, 1);
        assert_eq!(report.already_present, 2);
        assert_eq!(reconciler.member_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_membership_against_nft_listing() {
        use crate::cmd_abstraction::{CommandOutput, MockCommandExecutor};
        use crate::enforcer::NftablesEngine;

        // nft lists an element added as 1.2.3.4/32 as the bare address
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().returning(|_, args| match args[0].as_str() {
            "list" => Ok(CommandOutput::ok(
                "table inet filter {\n\tset blacklist {\n\t\telements = { 1.2.3.4 }\n\t}\n}\n",
            )),
            "delete" if args[5] == "{ 1.2.3.4 }" => Ok(CommandOutput::ok("")),
            _ => Ok(CommandOutput::failed("Error: unexpected command")),
        });
        let engine = NftablesEngine::new(mock, SetRef::default());
        let reconciler = SetReconciler::new(&engine);

        assert_eq!(
            reconciler.add(&p("1.2.3.4/32")).await.unwrap(),
            AddOutcome::AlreadyPresent
        );
        assert_eq!(
            reconciler.remove(&p("1.2.3.4/32")).await.unwrap(),
            RemoveOutcome::Removed
        );
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let engine = ready_engine().await;
        let reconciler = SetReconciler::new(&engine);

        assert_eq!(
            reconciler.remove(&p("203.0.113.0/24")).await.unwrap(),
            RemoveOutcome::NotPresent
        );
        reconciler.add(&p("203.0.113.0/24")).await.unwrap();
        assert_eq!(
            reconciler.remove(&p("203.0.113.0/24")).await.unwrap(),
            RemoveOutcome::Removed
        );
        assert!(!reconciler.contains(&p("203.0.113.0/24")).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_requires_set() {
        let engine = MemoryEngine::with_base_chains();
        let reconciler = SetReconciler::new(&engine);
        assert!(reconciler.add(&p("192.0.2.1")).await.is_err());
    }

    #[tokio::test]
    async fn test_add_many_skips_present_and_duplicates() {
        let engine = ready_engine().await;
        let reconciler = SetReconciler::new(&engine);
        reconciler.add(&p("10.0.0.0/8")).await.unwrap();

        let report = reconciler
            .add_many(vec![p("10.0.0.0/8"), p("192.0.2.0/24"), p("192.0.2.0/24")])
            .await;
        assert_eq!(
            report,
            AddManyReport {
                requested: 3,
                added: 1,
                already_present: 2,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_add_many_isolates_bad_element() {
        let engine = MemoryEngine::with_base_chains().reject_element("198.51.100.7");
        let reconciler = SetReconciler::new(&engine);
        reconciler.ensure_set_exists().await.unwrap();

        let report = reconciler
            .add_many(vec![p("192.0.2.1"), p("198.51.100.7"), p("203.0.113.9")])
            .await;
        assert_eq!(report.added, 2);
        assert_eq!(report.failed, 1);
        // one chunk attempt plus three individual retries
        assert_eq!(engine.add_calls(), 4);
        assert!(engine.elements().contains("203.0.113.9"));
    }

    #[tokio::test]
    async fn test_add_many_chunks() {
        let engine = ready_engine().await;
        let reconciler = SetReconciler::new(&engine);

        let prefixes: Vec<NetworkPrefix> = (0..(ADD_CHUNK_SIZE + 10))
            .map(|i| format!("10.{}.{}.0/24", i / 256, i % 256).parse().unwrap())
            .collect();
        let report = reconciler.add_many(prefixes).await;
        assert_eq!(report.added, ADD_CHUNK_SIZE + 10);
        assert_eq!(engine.add_calls(), 2);
    }

    #[tokio::test]
    async fn test_add_many_never_removes() {
        let engine = ready_engine().await;
        let reconciler = SetReconciler::new(&engine);
        reconciler.add(&p("81.30.0.0/16")).await.unwrap();

        reconciler.add_many(vec![p("192.0.2.0/24")]).await;
        assert!(reconciler.contains(&p("81.30.0.0/16")).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_many_missing_set_counts_failures() {
        let engine = MemoryEngine::with_base_chains();
        let reconciler = SetReconciler::new(&engine);
        let report = reconciler.add_many(vec![p("192.0.2.1")]).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.added, 0);
    }

    #[tokio::test]
    async fn test_snapshot_skips_merged_ranges() {
        let engine = ready_engine().await;
        let reconciler = SetReconciler::new(&engine);
        reconciler
            .add_many(vec![p("192.0.2.0/24"), p("198.51.100.5")])
            .await;

        let snapshot = reconciler.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(&p("198.51.100.5")));
    }

    #[test]
    fn test_report_merge() {
        let mut total = AddManyReport::default();
        total.merge(&AddManyReport {
            requested: 3,
            added: 2,
            already_present: 1,
            failed: 0,
        });
        total.merge(&AddManyReport {
            requested: 1,
            added: 0,
            already_present: 0,
            failed: 1,
        });
        assert_eq!(total.requested, 4);
        assert_eq!(total.added, 2);
        assert_eq!(total.failed, 1);
    }
}
