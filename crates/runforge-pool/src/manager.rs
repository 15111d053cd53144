//! Pool manager — owns runner pool lifecycle and bounded scaling.
//!
//! The `PoolManager` is the only component that mutates pool records and
//! runner sets. It:
//! - Creates pools lazily on first reference, seeded from defaults
//! - Validates cross-field bounds before committing pool updates
//! - Scales up through the container runtime, clamped to `max_runners`
//! - Scales down by reaping idle runners, never undercutting `min_runners`
//! - Derives the utilization metrics the auto-scaler consumes
//!
//! Per-repository scaling is mutually exclusive: a scaling operation holds
//! the repository's lock for its full duration, and a second operation
//! arriving meanwhile is rejected with `PoolError::ScalingInProgress`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use runforge_state::*;

use crate::error::{PoolError, PoolResult};
use crate::runtime::ContainerRuntime;

/// Seed values for lazily created pools.
///
/// `min_runners` defaults to zero so a freshly created pool satisfies
/// `min <= current <= max` before its first scale-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDefaults {
    pub min_runners: u32,
    pub max_runners: u32,
    pub scale_increment: u32,
    pub scale_threshold: f64,
    /// Labels stamped onto every runner this manager provisions.
    pub runner_labels: Vec<String>,
}

impl Default for PoolDefaults {
    fn default() -> Self {
        Self {
            min_runners: 0,
            max_runners: 10,
            scale_increment: 1,
            scale_threshold: 0.8,
            runner_labels: vec!["linux".to_string(), "x64".to_string()],
        }
    }
}

/// Partial update to a pool's sizing configuration. `None` fields keep
/// their current values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolUpdate {
    pub min_runners: Option<u32>,
    pub max_runners: Option<u32>,
    pub scale_increment: Option<u32>,
    pub scale_threshold: Option<f64>,
}

/// Derived metrics for one pool — the primary signal the auto-scaler reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolMetrics {
    pub repository: String,
    /// Runners currently executing a job.
    pub active: u32,
    /// Runners waiting for work.
    pub idle: u32,
    /// Runners attached but unreachable; excluded from utilization.
    pub offline: u32,
    /// active + idle.
    pub total: u32,
    /// active / total, 0.0 when the pool is empty.
    pub utilization: f64,
    pub scale_threshold: f64,
}

/// Result of a scale-up request. `provisioned` may be less than
/// `requested` when the pool hits `max_runners`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleOutcome {
    pub requested: u32,
    pub provisioned: u32,
    pub current_runners: u32,
}

/// Exclusive license to scale one repository's pool.
///
/// Obtained from [`PoolManager::begin_scaling`]; holding it guarantees no
/// other scaling operation (scheduled or manual) runs for the repository
/// until it is dropped.
pub struct ScalingGuard<'a> {
    manager: &'a PoolManager,
    repository: String,
    _permit: OwnedMutexGuard<()>,
}

impl ScalingGuard<'_> {
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Scale the pool up by `count`, clamped to `max_runners`.
    pub async fn scale_up(&self, count: u32) -> PoolResult<ScaleOutcome> {
        self.manager.scale_up_locked(&self.repository, count).await
    }

    /// Remove up to `count` idle runners, never undercutting `min_runners`.
    /// Returns the count actually removed.
    pub async fn scale_down(&self, count: u32) -> PoolResult<u32> {
        self.manager.scale_down_locked(&self.repository, count).await
    }
}

/// The pool manager owns the authoritative pool records and runner sets.
pub struct PoolManager {
    state: StateStore,
    runtime: Arc<dyn ContainerRuntime>,
    defaults: PoolDefaults,
    /// Per-repository scaling locks: repository → lock cell.
    scale_locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl PoolManager {
    /// Create a new pool manager.
    pub fn new(state: StateStore, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            state,
            runtime,
            defaults: PoolDefaults::default(),
            scale_locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Override the seed values used for lazily created pools.
    pub fn with_defaults(mut self, defaults: PoolDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Get the pool for a repository, creating it from defaults on first
    /// reference.
    pub async fn get_or_create_pool(&self, repository: &str) -> PoolResult<RunnerPool> {
        if let Some(pool) = self.state.get_pool(repository)? {
            return Ok(pool);
        }

        let now = epoch_secs();
        let pool = RunnerPool {
            repository: repository.to_string(),
            min_runners: self.defaults.min_runners,
            max_runners: self.defaults.max_runners,
            scale_increment: self.defaults.scale_increment,
            scale_threshold: self.defaults.scale_threshold,
            current_runners: 0,
            created_at: now,
            updated_at: now,
        };
        self.state.put_pool(&pool)?;
        info!(%repository, "pool created");
        Ok(pool)
    }

    /// Apply a partial update to a pool's sizing configuration.
    ///
    /// All cross-field invariants are checked against the merged record
    /// before anything is committed; a violation leaves the stored pool
    /// untouched.
    pub async fn update_pool(
        &self,
        repository: &str,
        update: PoolUpdate,
    ) -> PoolResult<RunnerPool> {
        let mut pool = self.get_or_create_pool(repository).await?;

        let merged_min = update.min_runners.unwrap_or(pool.min_runners);
        let merged_max = update.max_runners.unwrap_or(pool.max_runners);
        let merged_increment = update.scale_increment.unwrap_or(pool.scale_increment);
        let merged_threshold = update.scale_threshold.unwrap_or(pool.scale_threshold);

        if merged_max == 0 {
            return Err(PoolError::Validation(
                "max_runners must be at least 1".to_string(),
            ));
        }
        if merged_min > merged_max {
            return Err(PoolError::Validation(format!(
                "min_runners {merged_min} exceeds max_runners {merged_max}"
            )));
        }
        if merged_increment == 0 {
            return Err(PoolError::Validation(
                "scale_increment must be at least 1".to_string(),
            ));
        }
        if !(merged_threshold > 0.0 && merged_threshold <= 1.0) {
            return Err(PoolError::Validation(format!(
                "scale_threshold {merged_threshold} must be in (0.0, 1.0]"
            )));
        }

        pool.min_runners = merged_min;
        pool.max_runners = merged_max;
        pool.scale_increment = merged_increment;
        pool.scale_threshold = merged_threshold;
        pool.updated_at = epoch_secs();
        self.state.put_pool(&pool)?;

        info!(
            %repository,
            min = merged_min,
            max = merged_max,
            "pool updated"
        );
        Ok(pool)
    }

    /// Acquire the exclusive scaling lock for a repository.
    ///
    /// Rejects with `ScalingInProgress` if another scaling operation holds
    /// it; callers back off and retry rather than queueing.
    pub async fn begin_scaling(&self, repository: &str) -> PoolResult<ScalingGuard<'_>> {
        let cell = {
            let mut locks = self.scale_locks.write().await;
            locks
                .entry(repository.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let permit = cell
            .try_lock_owned()
            .map_err(|_| PoolError::ScalingInProgress(repository.to_string()))?;
        Ok(ScalingGuard {
            manager: self,
            repository: repository.to_string(),
            _permit: permit,
        })
    }

    /// Scale a pool up by `count` runners (manual trigger path).
    pub async fn scale_up(&self, repository: &str, count: u32) -> PoolResult<ScaleOutcome> {
        let guard = self.begin_scaling(repository).await?;
        guard.scale_up(count).await
    }

    /// Remove up to `count` idle runners (manual trigger path). Returns
    /// the count actually removed; zero is a valid, non-error result.
    pub async fn scale_down(&self, repository: &str, count: u32) -> PoolResult<u32> {
        let guard = self.begin_scaling(repository).await?;
        guard.scale_down(count).await
    }

    async fn scale_up_locked(&self, repository: &str, count: u32) -> PoolResult<ScaleOutcome> {
        let mut pool = self.get_or_create_pool(repository).await?;

        // Clamp so current + provisioned never exceeds max. Requests past
        // the bound succeed with fewer runners, so automatic and manual
        // triggers compose without erroring.
        let headroom = pool.max_runners.saturating_sub(pool.current_runners);
        let granted = count.min(headroom);
        if granted == 0 {
            debug!(%repository, requested = count, "pool at max capacity, nothing provisioned");
            return Ok(ScaleOutcome {
                requested: count,
                provisioned: 0,
                current_runners: pool.current_runners,
            });
        }

        let ids = self
            .runtime
            .provision(repository, granted, &self.defaults.runner_labels)
            .await
            .map_err(PoolError::Runtime)?;

        let now = epoch_secs();
        for id in &ids {
            let runner = Runner {
                id: id.clone(),
                name: format!("{}-{id}", repository.replace('/', "-")),
                status: RunnerStatus::Idle,
                labels: self.defaults.runner_labels.clone(),
                repository: repository.to_string(),
                created_at: now,
            };
            self.state.put_runner(&runner)?;
        }

        pool.current_runners += ids.len() as u32;
        pool.updated_at = now;
        self.state.put_pool(&pool)?;

        info!(
            %repository,
            requested = count,
            provisioned = ids.len(),
            current = pool.current_runners,
            "scaled up"
        );
        Ok(ScaleOutcome {
            requested: count,
            provisioned: ids.len() as u32,
            current_runners: pool.current_runners,
        })
    }

    async fn scale_down_locked(&self, repository: &str, count: u32) -> PoolResult<u32> {
        let mut pool = self.get_or_create_pool(repository).await?;

        // Only idle runners are eligible, and the pool never drops below
        // min_runners.
        let budget = count.min(pool.current_runners.saturating_sub(pool.min_runners));
        if budget == 0 {
            debug!(%repository, "at min capacity, nothing removed");
            return Ok(0);
        }

        let mut idle: Vec<Runner> = self
            .state
            .list_runners_for_repo(repository)?
            .into_iter()
            .filter(|r| r.status == RunnerStatus::Idle)
            .collect();
        // Reap newest first, keeping long-lived warm runners around.
        idle.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut removed = 0u32;
        for runner in idle.into_iter().take(budget as usize) {
            if let Err(e) = self.runtime.terminate(&runner.id).await {
                warn!(%repository, runner_id = %runner.id, error = %e, "terminate failed, runner kept");
                continue;
            }
            self.state.delete_runner(&runner.table_key())?;
            removed += 1;
        }

        if removed > 0 {
            pool.current_runners = pool.current_runners.saturating_sub(removed);
            pool.updated_at = epoch_secs();
            self.state.put_pool(&pool)?;
        }

        info!(%repository, removed, current = pool.current_runners, "scaled down");
        Ok(removed)
    }

    /// Derive utilization metrics from the pool's runner set.
    pub async fn get_pool_metrics(&self, repository: &str) -> PoolResult<PoolMetrics> {
        let pool = self.get_or_create_pool(repository).await?;
        let runners = self.state.list_runners_for_repo(repository)?;

        let active = runners.iter().filter(|r| r.status == RunnerStatus::Busy).count() as u32;
        let idle = runners.iter().filter(|r| r.status == RunnerStatus::Idle).count() as u32;
        let offline = runners
            .iter()
            .filter(|r| r.status == RunnerStatus::Offline)
            .count() as u32;
        let total = active + idle;
        let utilization = if total == 0 {
            0.0
        } else {
            f64::from(active) / f64::from(total)
        };

        Ok(PoolMetrics {
            repository: repository.to_string(),
            active,
            idle,
            offline,
            total,
            utilization,
            scale_threshold: pool.scale_threshold,
        })
    }

    /// All idle or busy runners attached to a repository's pool.
    pub async fn get_active_runners(&self, repository: &str) -> PoolResult<Vec<Runner>> {
        Ok(self
            .state
            .list_runners_for_repo(repository)?
            .into_iter()
            .filter(Runner::is_active)
            .collect())
    }

    /// Update a runner's status (job assignment and webhook layers call
    /// this as runners pick up and finish work).
    pub async fn update_runner_status(
        &self,
        runner_id: &str,
        status: RunnerStatus,
    ) -> PoolResult<Runner> {
        let mut runner = self
            .find_runner(runner_id)?
            .ok_or_else(|| PoolError::RunnerNotFound(runner_id.to_string()))?;
        runner.status = status;
        self.state.put_runner(&runner)?;
        Ok(runner)
    }

    /// Terminate and delete a single runner by ID, decrementing its
    /// pool's cached count.
    pub async fn remove_runner(&self, runner_id: &str) -> PoolResult<()> {
        let runner = self
            .find_runner(runner_id)?
            .ok_or_else(|| PoolError::RunnerNotFound(runner_id.to_string()))?;

        self.runtime
            .terminate(&runner.id)
            .await
            .map_err(PoolError::Runtime)?;
        self.state.delete_runner(&runner.table_key())?;

        if let Some(mut pool) = self.state.get_pool(&runner.repository)? {
            pool.current_runners = pool.current_runners.saturating_sub(1);
            pool.updated_at = epoch_secs();
            self.state.put_pool(&pool)?;
        }

        info!(%runner_id, repository = %runner.repository, "runner removed");
        Ok(())
    }

    /// List all pools.
    pub async fn get_all_pools(&self) -> PoolResult<Vec<RunnerPool>> {
        Ok(self.state.list_pools()?)
    }

    /// Delete a pool record. Refused while any runner remains attached;
    /// scale down or remove the runners first.
    pub async fn delete_pool(&self, repository: &str) -> PoolResult<()> {
        let attached = self.state.list_runners_for_repo(repository)?.len();
        if attached > 0 {
            return Err(PoolError::Validation(format!(
                "pool {repository} still has {attached} runners attached"
            )));
        }
        if !self.state.delete_pool(repository)? {
            return Err(PoolError::PoolNotFound(repository.to_string()));
        }
        info!(%repository, "pool deleted");
        Ok(())
    }

    fn find_runner(&self, runner_id: &str) -> PoolResult<Option<Runner>> {
        Ok(self
            .state
            .list_all_runners()?
            .into_iter()
            .find(|r| r.id == runner_id))
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
