//! StateStore — redb-backed state persistence for RunForge.
//!
//! Provides typed CRUD operations over pools, runners, routing rules,
//! scaling policies, metric history, and rule match analytics. All values
//! are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POOLS).map_err(map_err!(Table))?;
        txn.open_table(RUNNERS).map_err(map_err!(Table))?;
        txn.open_table(RULES).map_err(map_err!(Table))?;
        txn.open_table(POLICIES).map_err(map_err!(Table))?;
        txn.open_table(HISTORY).map_err(map_err!(Table))?;
        txn.open_table(RULE_MATCHES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Pools ──────────────────────────────────────────────────────

    /// Insert or update a runner pool.
    pub fn put_pool(&self, pool: &RunnerPool) -> StateResult<()> {
        let key = pool.table_key();
        let value = serde_json::to_vec(pool).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POOLS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "pool stored");
        Ok(())
    }

    /// Get a pool by repository.
    pub fn get_pool(&self, repository: &str) -> StateResult<Option<RunnerPool>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        match table.get(repository).map_err(map_err!(Read))? {
            Some(guard) => {
                let pool: RunnerPool =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(pool))
            }
            None => Ok(None),
        }
    }

    /// List all pools.
    pub fn list_pools(&self) -> StateResult<Vec<RunnerPool>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let pool: RunnerPool =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(pool);
        }
        Ok(results)
    }

    /// Delete a pool by repository. Returns true if it existed.
    pub fn delete_pool(&self, repository: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(POOLS).map_err(map_err!(Table))?;
            existed = table.remove(repository).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%repository, existed, "pool deleted");
        Ok(existed)
    }

    // ── Runners ────────────────────────────────────────────────────

    /// Insert or update a runner.
    pub fn put_runner(&self, runner: &Runner) -> StateResult<()> {
        let key = runner.table_key();
        let value = serde_json::to_vec(runner).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RUNNERS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a runner by its composite `{repository}:{runner_id}` key.
    pub fn get_runner(&self, key: &str) -> StateResult<Option<Runner>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RUNNERS).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let runner: Runner =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(runner))
            }
            None => Ok(None),
        }
    }

    /// List all runners for a given repository.
    pub fn list_runners_for_repo(&self, repository: &str) -> StateResult<Vec<Runner>> {
        let prefix = format!("{repository}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RUNNERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let runner: Runner =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(runner);
            }
        }
        Ok(results)
    }

    /// List every runner across all pools.
    pub fn list_all_runners(&self) -> StateResult<Vec<Runner>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RUNNERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let runner: Runner =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(runner);
        }
        Ok(results)
    }

    /// Delete a runner by key. Returns true if it existed.
    pub fn delete_runner(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(RUNNERS).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Delete all runners for a repository. Returns number deleted.
    pub fn delete_runners_for_repo(&self, repository: &str) -> StateResult<u32> {
        let prefix = format!("{repository}:");
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(RUNNERS).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect()
        };
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(RUNNERS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    // ── Routing rules ──────────────────────────────────────────────

    /// Insert or update a routing rule.
    pub fn put_rule(&self, rule: &RoutingRule) -> StateResult<()> {
        let key = rule.table_key();
        let value = serde_json::to_vec(rule).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RULES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(rule_id = %key, "routing rule stored");
        Ok(())
    }

    /// Get a routing rule by ID.
    pub fn get_rule(&self, rule_id: &str) -> StateResult<Option<RoutingRule>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RULES).map_err(map_err!(Table))?;
        match table.get(rule_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let rule: RoutingRule =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(rule))
            }
            None => Ok(None),
        }
    }

    /// List all routing rules (unordered; the router sorts).
    pub fn list_rules(&self) -> StateResult<Vec<RoutingRule>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RULES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let rule: RoutingRule =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(rule);
        }
        Ok(results)
    }

    /// Delete a routing rule by ID. Returns true if it existed.
    pub fn delete_rule(&self, rule_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(RULES).map_err(map_err!(Table))?;
            existed = table.remove(rule_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%rule_id, existed, "routing rule deleted");
        Ok(existed)
    }

    // ── Scaling policies ───────────────────────────────────────────

    /// Insert or update a scaling policy.
    pub fn put_policy(&self, policy: &ScalingPolicy) -> StateResult<()> {
        let key = policy.table_key();
        let value = serde_json::to_vec(policy).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "scaling policy stored");
        Ok(())
    }

    /// Get a scaling policy by repository.
    pub fn get_policy(&self, repository: &str) -> StateResult<Option<ScalingPolicy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        match table.get(repository).map_err(map_err!(Read))? {
            Some(guard) => {
                let policy: ScalingPolicy =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(policy))
            }
            None => Ok(None),
        }
    }

    /// List all stored scaling policies.
    pub fn list_policies(&self) -> StateResult<Vec<ScalingPolicy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let policy: ScalingPolicy =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(policy);
        }
        Ok(results)
    }

    /// Delete a scaling policy by repository. Returns true if it existed.
    pub fn delete_policy(&self, repository: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            existed = table.remove(repository).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Metrics history ────────────────────────────────────────────

    /// Append a scaling metric snapshot and evict entries older than the
    /// retention window, in one write transaction.
    ///
    /// Per-repository epochs are kept strictly monotonic: if a snapshot
    /// with an equal or later epoch already exists, the new snapshot's
    /// epoch is bumped past it. The (possibly adjusted) epoch is returned.
    pub fn append_snapshot(
        &self,
        snapshot: &ScalingMetricSnapshot,
        retention_secs: u64,
    ) -> StateResult<u64> {
        let mut snap = snapshot.clone();
        if let Some(latest) = self.latest_snapshot(&snap.repository)?
            && latest.epoch >= snap.epoch
        {
            snap.epoch = latest.epoch + 1;
        }

        let cutoff = snap.epoch.saturating_sub(retention_secs);
        let prefix = format!("{}:", snap.repository);
        // Collect expired keys under a read transaction.
        let expired: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, value) = entry.ok()?;
                    let k = key.value().to_string();
                    if !k.starts_with(&prefix) {
                        return None;
                    }
                    let old: ScalingMetricSnapshot =
                        serde_json::from_slice(value.value()).ok()?;
                    (old.epoch < cutoff).then_some(k)
                })
                .collect()
        };

        let key = snap.table_key();
        let value = serde_json::to_vec(&snap).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
            for old_key in &expired {
                table.remove(old_key.as_str()).map_err(map_err!(Write))?;
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            repository = %snap.repository,
            epoch = snap.epoch,
            evicted = expired.len(),
            "snapshot appended"
        );
        Ok(snap.epoch)
    }

    /// List snapshots for a repository with `epoch >= since`, oldest first.
    pub fn list_snapshots_since(
        &self,
        repository: &str,
        since: u64,
    ) -> StateResult<Vec<ScalingMetricSnapshot>> {
        let prefix = format!("{repository}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let snap: ScalingMetricSnapshot =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if snap.epoch >= since {
                    results.push(snap);
                }
            }
        }
        results.sort_by_key(|s| s.epoch);
        Ok(results)
    }

    /// The most recent snapshot for a repository, if any.
    pub fn latest_snapshot(
        &self,
        repository: &str,
    ) -> StateResult<Option<ScalingMetricSnapshot>> {
        let prefix = format!("{repository}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        let mut latest: Option<ScalingMetricSnapshot> = None;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let snap: ScalingMetricSnapshot =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if latest.as_ref().is_none_or(|l| snap.epoch > l.epoch) {
                    latest = Some(snap);
                }
            }
        }
        Ok(latest)
    }

    // ── Rule match analytics ───────────────────────────────────────

    /// Record one rule match at the given epoch (per-second buckets).
    pub fn record_rule_match(&self, rule_id: &str, epoch: u64) -> StateResult<()> {
        let bucket_key = RuleMatchBucket {
            rule_id: rule_id.to_string(),
            epoch,
            matches: 0,
        }
        .table_key();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RULE_MATCHES).map_err(map_err!(Table))?;
            let existing = match table.get(bucket_key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let bucket: RuleMatchBucket =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    bucket.matches
                }
                None => 0,
            };
            let bucket = RuleMatchBucket {
                rule_id: rule_id.to_string(),
                epoch,
                matches: existing + 1,
            };
            let value = serde_json::to_vec(&bucket).map_err(map_err!(Serialize))?;
            table
                .insert(bucket_key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Total matches per rule with `epoch >= since`.
    pub fn count_rule_matches_since(
        &self,
        since: u64,
    ) -> StateResult<std::collections::HashMap<RuleId, u64>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RULE_MATCHES).map_err(map_err!(Table))?;
        let mut counts = std::collections::HashMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let bucket: RuleMatchBucket =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if bucket.epoch >= since {
                *counts.entry(bucket.rule_id).or_insert(0) += bucket.matches;
            }
        }
        Ok(counts)
    }
}
