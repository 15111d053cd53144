//! Trend-based scaling prediction over the retained metrics history.
//!
//! A least-squares line through the retained utilization samples is
//! projected forward to the requested horizon. Confidence scales with
//! sample count: a sparse history yields a low-confidence prediction
//! that callers should treat as advisory.

use serde::{Deserialize, Serialize};

use crate::error::ScalerResult;
use crate::scaler::{AutoScaler, epoch_secs};

use runforge_state::ScalingMetricSnapshot;

/// Projected load and recommended pool size for a repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub repository: String,
    /// Horizon the projection was asked for.
    pub minutes: u32,
    /// Projected utilization at the horizon; may exceed 1.0 when demand
    /// is predicted to outgrow current capacity.
    pub predicted_utilization: f64,
    /// Runner count that would hold utilization at the pool's target,
    /// clamped to the pool's bounds.
    pub recommended_runners: u32,
    /// 0.0 (no usable history) to 1.0 (full sample window).
    pub confidence: f64,
    /// Snapshots the projection was computed from.
    pub samples: usize,
}

/// Least-squares fit over `(seconds-since-first-sample, utilization)`
/// points. Returns `(slope, intercept)`; a degenerate x-spread yields a
/// flat line through the mean.
pub(crate) fn linear_fit(points: &[(f64, f64)]) -> (f64, f64) {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let var_x: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if var_x == 0.0 {
        return (0.0, mean_y);
    }
    let cov: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let slope = cov / var_x;
    (slope, mean_y - slope * mean_x)
}

impl AutoScaler {
    /// Extrapolate the repository's utilization trend `minutes` ahead and
    /// recommend a runner count.
    pub async fn predict_scaling_needs(
        &self,
        repository: &str,
        minutes: u32,
    ) -> ScalerResult<Prediction> {
        let pool = self.pools.get_or_create_pool(repository).await?;
        let now = epoch_secs();
        let since = now.saturating_sub(self.config.history_retention_secs);
        let history = self.state.list_snapshots_since(repository, since)?;
        let samples = history.len();

        if samples < 2 {
            // Not enough points for a trend; echo the last observation.
            return Ok(Prediction {
                repository: repository.to_string(),
                minutes,
                predicted_utilization: history.last().map(|s| s.utilization).unwrap_or(0.0),
                recommended_runners: pool.current_runners.max(pool.min_runners),
                confidence: 0.0,
                samples,
            });
        }

        let origin = history[0].epoch;
        let points: Vec<(f64, f64)> = history
            .iter()
            .map(|s| ((s.epoch - origin) as f64, s.utilization))
            .collect();
        let (slope, intercept) = linear_fit(&points);

        let horizon = (now.saturating_sub(origin)) as f64 + f64::from(minutes) * 60.0;
        let predicted_utilization = (intercept + slope * horizon).max(0.0);

        // Size the pool so projected demand lands at the pool's
        // utilization target.
        let demand = predicted_utilization * f64::from(pool.current_runners);
        let recommended_runners = ((demand / pool.scale_threshold).ceil() as u32)
            .clamp(pool.min_runners, pool.max_runners);

        let confidence =
            (samples as f64 / self.config.min_history_points as f64).min(1.0);

        Ok(Prediction {
            repository: repository.to_string(),
            minutes,
            predicted_utilization,
            recommended_runners,
            confidence,
            samples,
        })
    }

    /// Retained snapshots for the trailing `minutes`, oldest first.
    /// Read-only; never mutates state.
    pub fn metrics_history(
        &self,
        repository: &str,
        minutes: u32,
    ) -> ScalerResult<Vec<ScalingMetricSnapshot>> {
        let since = epoch_secs().saturating_sub(u64::from(minutes) * 60);
        Ok(self.state.list_snapshots_since(repository, since)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestEnv;
    use runforge_state::{ScalingDecision, ScalingMetricSnapshot};

    fn snapshot(repository: &str, epoch: u64, utilization: f64) -> ScalingMetricSnapshot {
        ScalingMetricSnapshot {
            repository: repository.to_string(),
            epoch,
            utilization,
            queue_depth: 0,
            avg_wait_secs: 0.0,
            runner_count: 2,
            active_jobs: 1,
            decision: ScalingDecision::Maintain,
            reason: "within thresholds".to_string(),
        }
    }

    #[test]
    fn fit_recovers_a_rising_line() {
        let points: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, 0.1 * i as f64)).collect();
        let (slope, intercept) = linear_fit(&points);
        assert!((slope - 0.1).abs() < 1e-9);
        assert!(intercept.abs() < 1e-9);
    }

    #[test]
    fn fit_handles_flat_history() {
        let points = vec![(0.0, 0.5), (60.0, 0.5), (120.0, 0.5)];
        let (slope, intercept) = linear_fit(&points);
        assert_eq!(slope, 0.0);
        assert!((intercept - 0.5).abs() < 1e-9);
    }

    #[test]
    fn fit_degenerate_x_spread_is_flat_mean() {
        let points = vec![(10.0, 0.2), (10.0, 0.8)];
        let (slope, intercept) = linear_fit(&points);
        assert_eq!(slope, 0.0);
        assert!((intercept - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sparse_history_yields_zero_confidence() {
        let env = TestEnv::new();
        env.scaler.track("org/app").await.unwrap();

        let prediction = env
            .scaler
            .predict_scaling_needs("org/app", 15)
            .await
            .unwrap();

        assert_eq!(prediction.samples, 0);
        assert_eq!(prediction.confidence, 0.0);
        assert_eq!(prediction.predicted_utilization, 0.0);
    }

    #[tokio::test]
    async fn rising_utilization_predicts_higher_load() {
        let env = TestEnv::new();
        env.pools.scale_up("org/app", 2).await.unwrap();

        let now = epoch_secs();
        for (i, utilization) in [0.2, 0.4, 0.6, 0.8].iter().enumerate() {
            env.state
                .append_snapshot(
                    &snapshot("org/app", now - 240 + (i as u64) * 60, *utilization),
                    86_400,
                )
                .unwrap();
        }

        let prediction = env
            .scaler
            .predict_scaling_needs("org/app", 10)
            .await
            .unwrap();

        assert_eq!(prediction.samples, 4);
        assert!(prediction.predicted_utilization > 0.8);
        assert!(prediction.recommended_runners >= 2);
    }

    #[tokio::test]
    async fn confidence_grows_with_history_depth() {
        let env = TestEnv::new();
        env.scaler.track("org/app").await.unwrap();

        let now = epoch_secs();
        env.state
            .append_snapshot(&snapshot("org/app", now - 120, 0.5), 86_400)
            .unwrap();
        env.state
            .append_snapshot(&snapshot("org/app", now - 60, 0.5), 86_400)
            .unwrap();
        let thin = env
            .scaler
            .predict_scaling_needs("org/app", 5)
            .await
            .unwrap();

        for i in 0..12 {
            env.state
                .append_snapshot(&snapshot("org/app", now - 50 + i, 0.5), 86_400)
                .unwrap();
        }
        let deep = env
            .scaler
            .predict_scaling_needs("org/app", 5)
            .await
            .unwrap();

        assert!(thin.confidence > 0.0);
        assert!(deep.confidence > thin.confidence);
        assert_eq!(deep.confidence, 1.0);
    }

    #[tokio::test]
    async fn confidence_scale_follows_config() {
        let env = TestEnv::new();
        let scaler = crate::scaler::AutoScaler::new(
            env.pools.clone(),
            env.state.clone(),
            env.metrics.clone(),
        )
        .with_config(crate::config::ScalerConfig {
            min_history_points: 4,
            ..Default::default()
        });
        scaler.track("org/app").await.unwrap();

        let now = epoch_secs();
        env.state
            .append_snapshot(&snapshot("org/app", now - 120, 0.5), 86_400)
            .unwrap();
        env.state
            .append_snapshot(&snapshot("org/app", now - 60, 0.5), 86_400)
            .unwrap();

        let prediction = scaler.predict_scaling_needs("org/app", 5).await.unwrap();
        assert!((prediction.confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn recommendation_respects_pool_bounds() {
        let env = TestEnv::new();
        env.pools
            .update_pool("org/app", runforge_pool::PoolUpdate {
                min_runners: Some(1),
                max_runners: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();
        env.pools.scale_up("org/app", 3).await.unwrap();

        // Steep upward trend: raw recommendation would exceed max.
        let now = epoch_secs();
        for (i, utilization) in [0.5, 1.0, 1.0, 1.0].iter().enumerate() {
            env.state
                .append_snapshot(
                    &snapshot("org/app", now - 180 + (i as u64) * 60, *utilization),
                    86_400,
                )
                .unwrap();
        }

        let prediction = env
            .scaler
            .predict_scaling_needs("org/app", 30)
            .await
            .unwrap();
        assert!(prediction.recommended_runners <= 3);
        assert!(prediction.recommended_runners >= 1);
    }

    #[tokio::test]
    async fn history_window_is_bounded_and_ordered() {
        let env = TestEnv::new();
        env.scaler.track("org/app").await.unwrap();

        let now = epoch_secs();
        env.state
            .append_snapshot(&snapshot("org/app", now - 3600, 0.3), 86_400)
            .unwrap();
        env.state
            .append_snapshot(&snapshot("org/app", now - 60, 0.6), 86_400)
            .unwrap();

        let recent = env.scaler.metrics_history("org/app", 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].utilization, 0.6);

        let all = env.scaler.metrics_history("org/app", 120).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].epoch < all[1].epoch);
    }
}
