//! Auto-scaler — policy-driven pool scaling with cooldown windows.
//!
//! Each tracked repository cycles through Idle → Evaluating → Scaling →
//! Cooldown and back: an evaluation gathers pool utilization and queue
//! metrics, applies the repository's `ScalingPolicy`, invokes the pool
//! manager when thresholds are crossed, then suppresses further automatic
//! actions for the policy's cooldown window. Every evaluation — including
//! suppressed and failed ones — is appended to the bounded metrics
//! history.
//!
//! The scheduled loop and manual triggers (`evaluate_now`) share one code
//! path and one mutual-exclusion mechanism: the pool manager's per-repo
//! scaling lock is held for the full evaluation, so at most one scaling
//! decision is in flight per repository at any time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use runforge_pool::{PoolManager, ScalingGuard};
use runforge_state::*;

use crate::config::ScalerConfig;
use crate::error::{ScalerError, ScalerResult};
use crate::metrics::{MetricsSource, QueueMetrics};

/// The outcome of one evaluation cycle for a repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub repository: String,
    pub decision: ScalingDecision,
    pub reason: String,
    pub utilization: f64,
    pub queue_depth: u32,
    pub avg_wait_secs: f64,
    pub runner_count: u32,
    /// Runners actually added or removed by this evaluation.
    pub scaled_by: u32,
    pub epoch: u64,
}

/// Partial update to a scaling policy. `None` fields keep their current
/// (stored or default) values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub scale_up_threshold: Option<f64>,
    pub scale_down_threshold: Option<f64>,
    pub scale_up_increment: Option<u32>,
    pub scale_down_increment: Option<u32>,
    pub cooldown_secs: Option<u64>,
    pub queue_depth_threshold: Option<u32>,
    pub avg_wait_threshold_secs: Option<f64>,
}

/// A policy plus the repository's live scaling status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyStatus {
    pub repository: String,
    pub policy: ScalingPolicy,
    pub in_cooldown: bool,
    pub cooldown_remaining_secs: u64,
    pub last_decision: Option<ScalingDecision>,
    pub last_reason: Option<String>,
}

/// Per-repository scaling state (cooldown tracking and last outcome).
#[derive(Debug, Clone, Default)]
pub(crate) struct ScaleState {
    /// Epoch of the last scale-up/scale-down; 0 means never.
    pub(crate) last_action_epoch: u64,
    /// Cooldown window captured from the policy at action time.
    pub(crate) cooldown_secs: u64,
    pub(crate) last_decision: Option<ScalingDecision>,
    pub(crate) last_reason: Option<String>,
}

impl ScaleState {
    pub(crate) fn in_cooldown(&self, now: u64) -> bool {
        self.last_action_epoch > 0 && now < self.last_action_epoch + self.cooldown_secs
    }

    pub(crate) fn cooldown_remaining(&self, now: u64) -> u64 {
        (self.last_action_epoch + self.cooldown_secs).saturating_sub(now)
    }
}

/// The auto-scaler evaluates every pool on an interval and adjusts sizes
/// through the pool manager.
pub struct AutoScaler {
    pub(crate) pools: Arc<PoolManager>,
    pub(crate) state: StateStore,
    pub(crate) metrics: Arc<dyn MetricsSource>,
    pub(crate) config: ScalerConfig,
    /// Per-repository scaling state, owned by this instance (no
    /// module-level globals), keyed by repository.
    pub(crate) scale_states: Arc<RwLock<HashMap<String, ScaleState>>>,
}

impl AutoScaler {
    /// Create a new auto-scaler.
    pub fn new(
        pools: Arc<PoolManager>,
        state: StateStore,
        metrics: Arc<dyn MetricsSource>,
    ) -> Self {
        Self {
            pools,
            state,
            metrics,
            config: ScalerConfig::default(),
            scale_states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Override the scaler configuration.
    pub fn with_config(mut self, config: ScalerConfig) -> Self {
        self.config = config;
        self
    }

    /// Bring a repository under management: its pool is created (from
    /// defaults) if absent, and the scheduled loop evaluates it from the
    /// next tick on.
    pub async fn track(&self, repository: &str) -> ScalerResult<RunnerPool> {
        Ok(self.pools.get_or_create_pool(repository).await?)
    }

    /// Stop managing a repository: its pool record is deleted and its
    /// scaling state dropped. Refused while runners remain attached —
    /// scale the pool down first.
    pub async fn untrack(&self, repository: &str) -> ScalerResult<()> {
        self.pools.delete_pool(repository).await?;
        self.scale_states.write().await.remove(repository);
        info!(%repository, "repository untracked");
        Ok(())
    }

    /// Repositories currently evaluated by the scheduled loop.
    pub async fn tracked(&self) -> ScalerResult<Vec<String>> {
        Ok(self
            .state
            .list_pools()?
            .into_iter()
            .map(|p| p.repository)
            .collect())
    }

    // ── Policies ───────────────────────────────────────────────────

    /// The policy in effect for a repository: the stored override, or
    /// defaults when none exists.
    pub fn get_policy(&self, repository: &str) -> ScalerResult<ScalingPolicy> {
        Ok(self
            .state
            .get_policy(repository)?
            .unwrap_or_else(|| ScalingPolicy::default_for(repository)))
    }

    /// Apply a partial policy update. The merged policy is validated in
    /// full before committing; a violation leaves the stored policy
    /// untouched.
    pub fn update_policy(
        &self,
        repository: &str,
        update: PolicyUpdate,
    ) -> ScalerResult<ScalingPolicy> {
        let mut policy = self.get_policy(repository)?;

        if let Some(v) = update.scale_up_threshold {
            policy.scale_up_threshold = v;
        }
        if let Some(v) = update.scale_down_threshold {
            policy.scale_down_threshold = v;
        }
        if let Some(v) = update.scale_up_increment {
            policy.scale_up_increment = v;
        }
        if let Some(v) = update.scale_down_increment {
            policy.scale_down_increment = v;
        }
        if let Some(v) = update.cooldown_secs {
            policy.cooldown_secs = v;
        }
        if let Some(v) = update.queue_depth_threshold {
            policy.queue_depth_threshold = v;
        }
        if let Some(v) = update.avg_wait_threshold_secs {
            policy.avg_wait_threshold_secs = v;
        }

        policy.validate().map_err(ScalerError::PolicyValidation)?;
        self.state.put_policy(&policy)?;
        info!(%repository, "scaling policy updated");
        Ok(policy)
    }

    /// Every pool's effective policy plus live cooldown status.
    pub async fn list_policy_statuses(&self) -> ScalerResult<Vec<PolicyStatus>> {
        let now = epoch_secs();
        let states = self.scale_states.read().await;
        let mut statuses = Vec::new();
        for pool in self.state.list_pools()? {
            let policy = self.get_policy(&pool.repository)?;
            let scale_state = states.get(&pool.repository);
            statuses.push(PolicyStatus {
                in_cooldown: scale_state.is_some_and(|s| s.in_cooldown(now)),
                cooldown_remaining_secs: scale_state
                    .filter(|s| s.in_cooldown(now))
                    .map(|s| s.cooldown_remaining(now))
                    .unwrap_or(0),
                last_decision: scale_state.and_then(|s| s.last_decision),
                last_reason: scale_state.and_then(|s| s.last_reason.clone()),
                repository: pool.repository,
                policy,
            });
        }
        Ok(statuses)
    }

    // ── Evaluation ─────────────────────────────────────────────────

    /// Perform one synchronous, out-of-band evaluation for a repository.
    ///
    /// Uses identical logic to the scheduled loop (same code path, same
    /// per-repo exclusion), so it returns the decision the loop would
    /// have made at this instant. Collaborator failures surface as
    /// errors here rather than being swallowed.
    pub async fn evaluate_now(&self, repository: &str) -> ScalerResult<Evaluation> {
        let guard = self.pools.begin_scaling(repository).await?;
        self.evaluate_guarded(&guard).await
    }

    async fn evaluate_guarded(&self, guard: &ScalingGuard<'_>) -> ScalerResult<Evaluation> {
        let repository = guard.repository();
        let pool = self.pools.get_or_create_pool(repository).await?;
        let policy = self.get_policy(repository)?;
        let pool_metrics = self.pools.get_pool_metrics(repository).await?;
        let queue = self
            .metrics
            .queue_metrics(repository)
            .await
            .map_err(ScalerError::Metrics)?;

        let now = epoch_secs();
        let in_cooldown = {
            let states = self.scale_states.read().await;
            states
                .get(repository)
                .is_some_and(|s| s.in_cooldown(now))
        };

        let (decision, reason) = decide(&pool, &policy, pool_metrics.utilization, &queue, in_cooldown);

        let scaled_by = match decision {
            ScalingDecision::ScaleUp => {
                let outcome = guard.scale_up(policy.scale_up_increment).await?;
                outcome.provisioned
            }
            ScalingDecision::ScaleDown => guard.scale_down(policy.scale_down_increment).await?,
            ScalingDecision::Maintain => 0,
        };

        {
            let mut states = self.scale_states.write().await;
            let scale_state = states.entry(repository.to_string()).or_default();
            if decision != ScalingDecision::Maintain {
                scale_state.last_action_epoch = now;
                scale_state.cooldown_secs = policy.cooldown_secs;
            }
            scale_state.last_decision = Some(decision);
            scale_state.last_reason = Some(reason.clone());
        }

        let snapshot = ScalingMetricSnapshot {
            repository: repository.to_string(),
            epoch: now,
            utilization: pool_metrics.utilization,
            queue_depth: queue.queue_depth,
            avg_wait_secs: queue.avg_wait_secs,
            runner_count: pool_metrics.total,
            active_jobs: queue.active_jobs,
            decision,
            reason: reason.clone(),
        };
        let epoch = self
            .state
            .append_snapshot(&snapshot, self.config.history_retention_secs)?;

        debug!(
            %repository,
            ?decision,
            %reason,
            utilization = pool_metrics.utilization,
            queue_depth = queue.queue_depth,
            scaled_by,
            "evaluation complete"
        );

        Ok(Evaluation {
            repository: repository.to_string(),
            decision,
            reason,
            utilization: pool_metrics.utilization,
            queue_depth: queue.queue_depth,
            avg_wait_secs: queue.avg_wait_secs,
            runner_count: pool_metrics.total,
            scaled_by,
            epoch,
        })
    }

    /// One scheduled-loop cycle for a repository: failures are logged and
    /// recorded as "evaluation error" rather than propagated, and a cycle
    /// that loses the scaling lock to a concurrent trigger is skipped.
    pub async fn evaluate_cycle(&self, repository: &str) -> Option<Evaluation> {
        match self.evaluate_now(repository).await {
            Ok(evaluation) => Some(evaluation),
            Err(e) if e.is_scaling_in_progress() => {
                debug!(%repository, "scaling in flight, cycle skipped");
                None
            }
            Err(e) => {
                warn!(%repository, error = %e, "evaluation failed, recorded as maintain");
                let now = epoch_secs();
                let snapshot = ScalingMetricSnapshot {
                    repository: repository.to_string(),
                    epoch: now,
                    utilization: 0.0,
                    queue_depth: 0,
                    avg_wait_secs: 0.0,
                    runner_count: 0,
                    active_jobs: 0,
                    decision: ScalingDecision::Maintain,
                    reason: "evaluation error".to_string(),
                };
                let epoch = match self
                    .state
                    .append_snapshot(&snapshot, self.config.history_retention_secs)
                {
                    Ok(epoch) => epoch,
                    Err(e) => {
                        warn!(%repository, error = %e, "failed to record evaluation error");
                        now
                    }
                };
                Some(Evaluation {
                    repository: repository.to_string(),
                    decision: ScalingDecision::Maintain,
                    reason: "evaluation error".to_string(),
                    utilization: 0.0,
                    queue_depth: 0,
                    avg_wait_secs: 0.0,
                    runner_count: 0,
                    scaled_by: 0,
                    epoch,
                })
            }
        }
    }

    /// Evaluate every tracked repository once, sequentially. A failure on
    /// one repository never halts the others.
    pub async fn evaluate_all(&self) -> Vec<Evaluation> {
        let repositories = match self.tracked().await {
            Ok(repos) => repos,
            Err(e) => {
                warn!(error = %e, "failed to list pools for evaluation");
                return Vec::new();
            }
        };

        let mut evaluations = Vec::new();
        for repository in repositories {
            if let Some(evaluation) = self.evaluate_cycle(&repository).await {
                evaluations.push(evaluation);
            }
        }
        evaluations
    }

    /// Run the evaluation loop. Each tick evaluates all tracked
    /// repositories concurrently, one task per repository.
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "auto-scaler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let repositories = match self.tracked().await {
                        Ok(repos) => repos,
                        Err(e) => {
                            warn!(error = %e, "failed to list pools for evaluation");
                            continue;
                        }
                    };

                    let mut tasks = JoinSet::new();
                    for repository in repositories {
                        let scaler = Arc::clone(&self);
                        tasks.spawn(async move {
                            scaler.evaluate_cycle(&repository).await;
                        });
                    }
                    while tasks.join_next().await.is_some() {}
                }
                _ = shutdown.changed() => {
                    info!("auto-scaler shutting down");
                    break;
                }
            }
        }
    }
}

/// Apply a scaling policy to observed metrics. Pure; shared by live
/// evaluation and the read-only fleet recommendations.
pub(crate) fn decide(
    pool: &RunnerPool,
    policy: &ScalingPolicy,
    utilization: f64,
    queue: &QueueMetrics,
    in_cooldown: bool,
) -> (ScalingDecision, String) {
    if in_cooldown {
        return (ScalingDecision::Maintain, "in cooldown".to_string());
    }

    let wants_up = utilization > policy.scale_up_threshold
        || queue.queue_depth > policy.queue_depth_threshold
        || queue.avg_wait_secs > policy.avg_wait_threshold_secs;

    if wants_up {
        if pool.current_runners >= pool.max_runners {
            return (ScalingDecision::Maintain, "at max capacity".to_string());
        }
        let reason = if utilization > policy.scale_up_threshold {
            format!(
                "utilization {:.2} above threshold {:.2}",
                utilization, policy.scale_up_threshold
            )
        } else if queue.queue_depth > policy.queue_depth_threshold {
            format!(
                "queue depth {} above threshold {}",
                queue.queue_depth, policy.queue_depth_threshold
            )
        } else {
            format!(
                "avg wait {:.0}s above threshold {:.0}s",
                queue.avg_wait_secs, policy.avg_wait_threshold_secs
            )
        };
        return (ScalingDecision::ScaleUp, reason);
    }

    if utilization < policy.scale_down_threshold && queue.queue_depth == 0 {
        if pool.current_runners <= pool.min_runners {
            return (ScalingDecision::Maintain, "at min capacity".to_string());
        }
        return (
            ScalingDecision::ScaleDown,
            format!(
                "utilization {:.2} below threshold {:.2}",
                utilization, policy.scale_down_threshold
            ),
        );
    }

    (ScalingDecision::Maintain, "within thresholds".to_string())
}

/// Current Unix epoch in seconds.
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use runforge_pool::{PoolError, PoolUpdate};

    fn pool_record(min: u32, max: u32, current: u32) -> RunnerPool {
        RunnerPool {
            repository: "org/app".to_string(),
            min_runners: min,
            max_runners: max,
            scale_increment: 1,
            scale_threshold: 0.8,
            current_runners: current,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn queue(depth: u32, wait: f64) -> QueueMetrics {
        QueueMetrics {
            queue_depth: depth,
            avg_wait_secs: wait,
            active_jobs: depth,
        }
    }

    #[test]
    fn cooldown_window_expires() {
        let state = ScaleState {
            last_action_epoch: 1000,
            cooldown_secs: 60,
            ..Default::default()
        };
        assert!(state.in_cooldown(1030));
        assert_eq!(state.cooldown_remaining(1030), 30);
        // The window is half-open: expired exactly at last_action + cooldown.
        assert!(!state.in_cooldown(1060));
        assert_eq!(state.cooldown_remaining(1100), 0);
        // A repository that never scaled is never in cooldown.
        assert!(!ScaleState::default().in_cooldown(1000));
    }

    // ── decide(): pure policy application ──────────────────────────

    #[test]
    fn high_utilization_triggers_scale_up() {
        let pool = pool_record(1, 5, 2);
        let policy = ScalingPolicy::default_for("org/app");

        let (decision, reason) = decide(&pool, &policy, 0.9, &queue(3, 0.0), false);
        assert_eq!(decision, ScalingDecision::ScaleUp);
        assert!(reason.contains("utilization"));
    }

    #[test]
    fn queue_depth_triggers_scale_up_at_low_utilization() {
        let pool = pool_record(1, 5, 2);
        let policy = ScalingPolicy::default_for("org/app");

        let (decision, reason) = decide(&pool, &policy, 0.5, &queue(9, 0.0), false);
        assert_eq!(decision, ScalingDecision::ScaleUp);
        assert!(reason.contains("queue depth"));
    }

    #[test]
    fn avg_wait_triggers_scale_up() {
        let pool = pool_record(1, 5, 2);
        let policy = ScalingPolicy::default_for("org/app");

        let (decision, reason) = decide(&pool, &policy, 0.5, &queue(1, 300.0), false);
        assert_eq!(decision, ScalingDecision::ScaleUp);
        assert!(reason.contains("avg wait"));
    }

    #[test]
    fn at_max_capacity_maintains_instead_of_scaling() {
        let pool = pool_record(1, 5, 5);
        let policy = ScalingPolicy::default_for("org/app");

        let (decision, reason) = decide(&pool, &policy, 0.95, &queue(0, 0.0), false);
        assert_eq!(decision, ScalingDecision::Maintain);
        assert_eq!(reason, "at max capacity");
    }

    #[test]
    fn low_utilization_with_empty_queue_scales_down() {
        let pool = pool_record(1, 5, 3);
        let policy = ScalingPolicy::default_for("org/app");

        let (decision, _) = decide(&pool, &policy, 0.1, &queue(0, 0.0), false);
        assert_eq!(decision, ScalingDecision::ScaleDown);
    }

    #[test]
    fn low_utilization_with_queued_jobs_does_not_scale_down() {
        let pool = pool_record(1, 5, 3);
        let policy = ScalingPolicy::default_for("org/app");

        let (decision, _) = decide(&pool, &policy, 0.1, &queue(2, 0.0), false);
        assert_eq!(decision, ScalingDecision::Maintain);
    }

    #[test]
    fn at_min_capacity_maintains_instead_of_shrinking() {
        let pool = pool_record(2, 5, 2);
        let policy = ScalingPolicy::default_for("org/app");

        let (decision, reason) = decide(&pool, &policy, 0.0, &queue(0, 0.0), false);
        assert_eq!(decision, ScalingDecision::Maintain);
        assert_eq!(reason, "at min capacity");
    }

    #[test]
    fn cooldown_suppresses_everything() {
        let pool = pool_record(1, 5, 2);
        let policy = ScalingPolicy::default_for("org/app");

        let (decision, reason) = decide(&pool, &policy, 0.99, &queue(50, 900.0), true);
        assert_eq!(decision, ScalingDecision::Maintain);
        assert_eq!(reason, "in cooldown");
    }

    #[test]
    fn mid_band_utilization_maintains() {
        let pool = pool_record(1, 5, 2);
        let policy = ScalingPolicy::default_for("org/app");

        let (decision, reason) = decide(&pool, &policy, 0.5, &queue(0, 10.0), false);
        assert_eq!(decision, ScalingDecision::Maintain);
        assert_eq!(reason, "within thresholds");
    }

    // ── Full evaluation path ───────────────────────────────────────

    #[tokio::test]
    async fn scale_up_scenario_grows_pool_by_increment() {
        let env = TestEnv::new();
        env.pools
            .update_pool("org/app", PoolUpdate {
                min_runners: Some(1),
                max_runners: Some(5),
                ..Default::default()
            })
            .await
            .unwrap();
        env.pools.scale_up("org/app", 2).await.unwrap();
        env.mark_all_busy("org/app").await;
        env.metrics.set("org/app", queue(3, 0.0));

        let evaluation = env.scaler.evaluate_now("org/app").await.unwrap();

        assert_eq!(evaluation.decision, ScalingDecision::ScaleUp);
        assert_eq!(evaluation.scaled_by, 1);
        let pool = env.pools.get_or_create_pool("org/app").await.unwrap();
        assert_eq!(pool.current_runners, 3);
    }

    #[tokio::test]
    async fn scale_up_clamps_to_max() {
        let env = TestEnv::new();
        env.pools
            .update_pool("org/app", PoolUpdate {
                max_runners: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();
        env.scaler
            .update_policy("org/app", PolicyUpdate {
                scale_up_increment: Some(5),
                cooldown_secs: Some(0),
                ..Default::default()
            })
            .unwrap();
        env.pools.scale_up("org/app", 2).await.unwrap();
        env.mark_all_busy("org/app").await;

        let evaluation = env.scaler.evaluate_now("org/app").await.unwrap();

        assert_eq!(evaluation.decision, ScalingDecision::ScaleUp);
        // Increment of 5 requested, but only 1 slot below max.
        assert_eq!(evaluation.scaled_by, 1);
        let pool = env.pools.get_or_create_pool("org/app").await.unwrap();
        assert_eq!(pool.current_runners, 3);
    }

    #[tokio::test]
    async fn at_max_pool_maintains_with_reason() {
        let env = TestEnv::new();
        env.pools
            .update_pool("org/app", PoolUpdate {
                max_runners: Some(5),
                ..Default::default()
            })
            .await
            .unwrap();
        env.pools.scale_up("org/app", 5).await.unwrap();
        env.mark_all_busy("org/app").await;

        let evaluation = env.scaler.evaluate_now("org/app").await.unwrap();

        assert_eq!(evaluation.decision, ScalingDecision::Maintain);
        assert_eq!(evaluation.reason, "at max capacity");
        let pool = env.pools.get_or_create_pool("org/app").await.unwrap();
        assert_eq!(pool.current_runners, 5);
    }

    #[tokio::test]
    async fn scale_down_removes_idle_runners() {
        let env = TestEnv::new();
        env.pools
            .update_pool("org/app", PoolUpdate {
                min_runners: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        env.pools.scale_up("org/app", 3).await.unwrap();
        // All idle: utilization 0, empty queue.

        let evaluation = env.scaler.evaluate_now("org/app").await.unwrap();

        assert_eq!(evaluation.decision, ScalingDecision::ScaleDown);
        assert_eq!(evaluation.scaled_by, 1);
        let pool = env.pools.get_or_create_pool("org/app").await.unwrap();
        assert_eq!(pool.current_runners, 2);
    }

    #[tokio::test]
    async fn cooldown_yields_identical_maintain_decisions() {
        let env = TestEnv::new();
        env.pools.scale_up("org/app", 2).await.unwrap();
        env.mark_all_busy("org/app").await;

        let first = env.scaler.evaluate_now("org/app").await.unwrap();
        assert_eq!(first.decision, ScalingDecision::ScaleUp);

        // Still overloaded, but the cooldown window suppresses action —
        // twice, with identical reason text.
        let second = env.scaler.evaluate_now("org/app").await.unwrap();
        let third = env.scaler.evaluate_now("org/app").await.unwrap();
        assert_eq!(second.decision, ScalingDecision::Maintain);
        assert_eq!(second.reason, "in cooldown");
        assert_eq!(third.decision, ScalingDecision::Maintain);
        assert_eq!(third.reason, second.reason);
        assert_eq!(second.scaled_by, 0);
    }

    #[tokio::test]
    async fn zero_cooldown_allows_consecutive_actions() {
        let env = TestEnv::new();
        env.scaler
            .update_policy("org/app", PolicyUpdate {
                cooldown_secs: Some(0),
                ..Default::default()
            })
            .unwrap();
        env.pools.scale_up("org/app", 2).await.unwrap();
        env.mark_all_busy("org/app").await;

        let first = env.scaler.evaluate_now("org/app").await.unwrap();
        assert_eq!(first.decision, ScalingDecision::ScaleUp);

        env.mark_all_busy("org/app").await;
        let second = env.scaler.evaluate_now("org/app").await.unwrap();
        assert_eq!(second.decision, ScalingDecision::ScaleUp);
    }

    #[tokio::test]
    async fn evaluations_append_to_history() {
        let env = TestEnv::new();
        env.pools.scale_up("org/app", 1).await.unwrap();

        env.scaler.evaluate_now("org/app").await.unwrap();
        env.scaler.evaluate_now("org/app").await.unwrap();

        let history = env.state.list_snapshots_since("org/app", 0).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].epoch < history[1].epoch);
    }

    #[tokio::test]
    async fn metrics_failure_surfaces_from_evaluate_now() {
        let env = TestEnv::new();
        env.pools.scale_up("org/app", 1).await.unwrap();
        env.metrics.fail(true);

        let result = env.scaler.evaluate_now("org/app").await;
        assert!(matches!(result, Err(ScalerError::Metrics(_))));
    }

    #[tokio::test]
    async fn loop_cycle_records_evaluation_error_and_continues() {
        let env = TestEnv::new();
        env.pools.scale_up("org/app", 1).await.unwrap();
        env.pools.scale_up("org/other", 1).await.unwrap();
        env.metrics.fail(true);

        let evaluations = env.scaler.evaluate_all().await;

        // Both repositories produce a cycle result despite the failure.
        assert_eq!(evaluations.len(), 2);
        for evaluation in &evaluations {
            assert_eq!(evaluation.decision, ScalingDecision::Maintain);
            assert_eq!(evaluation.reason, "evaluation error");
        }
        let history = env.state.list_snapshots_since("org/app", 0).unwrap();
        assert_eq!(history.last().unwrap().reason, "evaluation error");
    }

    #[tokio::test]
    async fn concurrent_evaluation_is_rejected_not_interleaved() {
        let env = TestEnv::new();
        env.pools.get_or_create_pool("org/app").await.unwrap();

        let guard = env.pools.begin_scaling("org/app").await.unwrap();
        let result = env.scaler.evaluate_now("org/app").await;

        match result {
            Err(e) => assert!(e.is_scaling_in_progress()),
            Ok(_) => panic!("expected scaling-in-progress rejection"),
        }
        assert!(matches!(
            env.pools.scale_up("org/app", 1).await,
            Err(PoolError::ScalingInProgress(_))
        ));
        drop(guard);

        assert!(env.scaler.evaluate_now("org/app").await.is_ok());
    }

    // ── Policy management ──────────────────────────────────────────

    #[tokio::test]
    async fn policy_update_rejection_retains_prior_policy() {
        let env = TestEnv::new();
        env.scaler
            .update_policy("org/app", PolicyUpdate {
                scale_up_threshold: Some(0.9),
                ..Default::default()
            })
            .unwrap();

        // scale_down >= scale_up is invalid.
        let result = env.scaler.update_policy("org/app", PolicyUpdate {
            scale_down_threshold: Some(0.95),
            ..Default::default()
        });
        assert!(matches!(result, Err(ScalerError::PolicyValidation(_))));

        let policy = env.scaler.get_policy("org/app").unwrap();
        assert_eq!(policy.scale_up_threshold, 0.9);
        assert_eq!(
            policy.scale_down_threshold,
            ScalingPolicy::default_for("org/app").scale_down_threshold
        );
    }

    #[tokio::test]
    async fn policy_statuses_reflect_cooldown() {
        let env = TestEnv::new();
        env.pools.scale_up("org/app", 2).await.unwrap();
        env.mark_all_busy("org/app").await;
        env.scaler.evaluate_now("org/app").await.unwrap();

        let statuses = env.scaler.list_policy_statuses().await.unwrap();
        let status = statuses
            .iter()
            .find(|s| s.repository == "org/app")
            .unwrap();

        assert!(status.in_cooldown);
        assert!(status.cooldown_remaining_secs > 0);
        assert_eq!(status.last_decision, Some(ScalingDecision::ScaleUp));
    }

    #[tokio::test]
    async fn untrack_removes_pool_and_scaling_state() {
        let env = TestEnv::new();
        env.pools.scale_up("org/app", 2).await.unwrap();
        env.mark_all_busy("org/app").await;
        env.scaler.evaluate_now("org/app").await.unwrap();

        // Runners still attached: untrack is refused.
        assert!(env.scaler.untrack("org/app").await.is_err());

        for runner in env.pools.get_active_runners("org/app").await.unwrap() {
            env.pools.remove_runner(&runner.id).await.unwrap();
        }
        env.scaler.untrack("org/app").await.unwrap();

        assert!(env.scaler.tracked().await.unwrap().is_empty());
        assert!(env.scaler.list_policy_statuses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn untouched_repository_has_no_cooldown() {
        let env = TestEnv::new();
        env.scaler.track("org/app").await.unwrap();

        let statuses = env.scaler.list_policy_statuses().await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(!statuses[0].in_cooldown);
        assert_eq!(statuses[0].cooldown_remaining_secs, 0);
        assert_eq!(statuses[0].last_decision, None);
    }
}
