//! Fleet-wide views: scale recommendations and the consolidated
//! dashboard snapshot. Both are read-only passes over current state —
//! nothing here mutates pools or stamps cooldowns.

use serde::{Deserialize, Serialize};
use tracing::warn;

use runforge_state::ScalingDecision;

use crate::error::ScalerResult;
use crate::scaler::{AutoScaler, decide, epoch_secs};

/// What the scaler would do for one pool right now, without doing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScaleRecommendation {
    pub repository: String,
    pub decision: ScalingDecision,
    pub reason: String,
    pub current_runners: u32,
    pub utilization: f64,
}

/// Live status summary for one repository on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoStatus {
    pub repository: String,
    pub current_runners: u32,
    pub min_runners: u32,
    pub max_runners: u32,
    pub utilization: f64,
    pub in_cooldown: bool,
    pub cooldown_remaining_secs: u64,
    pub last_decision: Option<ScalingDecision>,
    /// Retained history entries for this repository.
    pub history_depth: usize,
}

/// Consolidated fleet snapshot for dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub pool_count: usize,
    pub total_runners: u32,
    pub active_runners: u32,
    pub idle_runners: u32,
    pub offline_runners: u32,
    /// Mean utilization across non-empty pools.
    pub average_utilization: f64,
    pub repositories: Vec<RepoStatus>,
}

impl AutoScaler {
    /// Aggregate scale-up/scale-down recommendations across all pools.
    ///
    /// Applies the same policy logic as a live evaluation (cooldowns
    /// included) but performs no scaling, stamps no cooldowns, and
    /// appends nothing to history. A repository whose metrics source
    /// fails is skipped with a warning.
    pub async fn recommendations(&self) -> ScalerResult<Vec<ScaleRecommendation>> {
        let now = epoch_secs();
        let mut recommendations = Vec::new();

        for pool in self.state.list_pools()? {
            let repository = pool.repository.clone();
            let policy = self.get_policy(&repository)?;
            let pool_metrics = self.pools.get_pool_metrics(&repository).await?;
            let queue = match self.metrics.queue_metrics(&repository).await {
                Ok(queue) => queue,
                Err(e) => {
                    warn!(%repository, error = %e, "metrics unavailable, pool skipped");
                    continue;
                }
            };

            let in_cooldown = {
                let states = self.scale_states.read().await;
                states.get(&repository).is_some_and(|s| s.in_cooldown(now))
            };

            let (decision, reason) =
                decide(&pool, &policy, pool_metrics.utilization, &queue, in_cooldown);
            recommendations.push(ScaleRecommendation {
                repository,
                decision,
                reason,
                current_runners: pool.current_runners,
                utilization: pool_metrics.utilization,
            });
        }
        Ok(recommendations)
    }

    /// Consolidated snapshot of every pool, runner totals by status, and
    /// per-repository scaling state.
    pub async fn dashboard(&self) -> ScalerResult<DashboardSnapshot> {
        let now = epoch_secs();
        let history_floor = now.saturating_sub(self.config.history_retention_secs);
        let pools = self.state.list_pools()?;

        let mut total = 0u32;
        let mut active = 0u32;
        let mut idle = 0u32;
        let mut offline = 0u32;
        let mut utilization_sum = 0.0;
        let mut utilized_pools = 0usize;
        let mut repositories = Vec::new();

        let states = self.scale_states.read().await;
        for pool in &pools {
            let metrics = self.pools.get_pool_metrics(&pool.repository).await?;
            total += metrics.total;
            active += metrics.active;
            idle += metrics.idle;
            offline += metrics.offline;
            if metrics.total > 0 {
                utilization_sum += metrics.utilization;
                utilized_pools += 1;
            }

            let scale_state = states.get(&pool.repository);
            let history_depth = self
                .state
                .list_snapshots_since(&pool.repository, history_floor)?
                .len();

            repositories.push(RepoStatus {
                repository: pool.repository.clone(),
                current_runners: pool.current_runners,
                min_runners: pool.min_runners,
                max_runners: pool.max_runners,
                utilization: metrics.utilization,
                in_cooldown: scale_state.is_some_and(|s| s.in_cooldown(now)),
                cooldown_remaining_secs: scale_state
                    .filter(|s| s.in_cooldown(now))
                    .map(|s| s.cooldown_remaining(now))
                    .unwrap_or(0),
                last_decision: scale_state.and_then(|s| s.last_decision),
                history_depth,
            });
        }

        Ok(DashboardSnapshot {
            pool_count: pools.len(),
            total_runners: total,
            active_runners: active,
            idle_runners: idle,
            offline_runners: offline,
            average_utilization: if utilized_pools > 0 {
                utilization_sum / utilized_pools as f64
            } else {
                0.0
            },
            repositories,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::QueueMetrics;
    use crate::testutil::TestEnv;

    #[tokio::test]
    async fn recommendations_cover_every_reachable_pool() {
        let env = TestEnv::new();

        // org/hot: fully busy → scale-up. org/cold: all idle → scale-down.
        env.pools.scale_up("org/hot", 2).await.unwrap();
        env.mark_all_busy("org/hot").await;
        env.pools.scale_up("org/cold", 2).await.unwrap();

        let recommendations = env.scaler.recommendations().await.unwrap();
        assert_eq!(recommendations.len(), 2);

        let hot = recommendations
            .iter()
            .find(|r| r.repository == "org/hot")
            .unwrap();
        assert_eq!(hot.decision, ScalingDecision::ScaleUp);

        let cold = recommendations
            .iter()
            .find(|r| r.repository == "org/cold")
            .unwrap();
        assert_eq!(cold.decision, ScalingDecision::ScaleDown);

        // Purely advisory: pool sizes unchanged, no history written.
        let pool = env.pools.get_or_create_pool("org/hot").await.unwrap();
        assert_eq!(pool.current_runners, 2);
        assert!(env.state.list_snapshots_since("org/hot", 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn recommendations_skip_pools_with_failing_metrics() {
        let env = TestEnv::new();
        env.pools.scale_up("org/app", 1).await.unwrap();
        env.metrics.fail(true);

        let recommendations = env.scaler.recommendations().await.unwrap();
        assert!(recommendations.is_empty());
    }

    #[tokio::test]
    async fn recommendations_respect_cooldown() {
        let env = TestEnv::new();
        env.pools.scale_up("org/app", 2).await.unwrap();
        env.mark_all_busy("org/app").await;
        env.scaler.evaluate_now("org/app").await.unwrap();

        env.mark_all_busy("org/app").await;
        let recommendations = env.scaler.recommendations().await.unwrap();
        assert_eq!(recommendations[0].decision, ScalingDecision::Maintain);
        assert_eq!(recommendations[0].reason, "in cooldown");
    }

    #[tokio::test]
    async fn dashboard_aggregates_runner_totals() {
        let env = TestEnv::new();
        // Pin org/a at its current size so the evaluation below is a
        // pure "at min capacity" maintain that only writes history.
        env.pools
            .update_pool("org/a", runforge_pool::PoolUpdate {
                min_runners: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();
        env.pools.scale_up("org/a", 3).await.unwrap();
        env.pools.scale_up("org/b", 1).await.unwrap();
        env.mark_all_busy("org/b").await;
        env.scaler.evaluate_now("org/a").await.unwrap();

        let dashboard = env.scaler.dashboard().await.unwrap();

        assert_eq!(dashboard.pool_count, 2);
        assert_eq!(dashboard.total_runners, 4);
        assert_eq!(dashboard.active_runners, 1);
        assert_eq!(dashboard.idle_runners, 3);
        // org/a at 0.0, org/b at 1.0.
        assert!((dashboard.average_utilization - 0.5).abs() < 1e-9);

        let repo_a = dashboard
            .repositories
            .iter()
            .find(|r| r.repository == "org/a")
            .unwrap();
        assert_eq!(repo_a.history_depth, 1);
    }

    #[tokio::test]
    async fn empty_fleet_dashboard_is_all_zeroes() {
        let env = TestEnv::new();
        env.metrics.set("unused", QueueMetrics::default());

        let dashboard = env.scaler.dashboard().await.unwrap();
        assert_eq!(dashboard.pool_count, 0);
        assert_eq!(dashboard.total_runners, 0);
        assert_eq!(dashboard.average_utilization, 0.0);
        assert!(dashboard.repositories.is_empty());
    }
}
