//! External metrics collaborator interface.
//!
//! Pool utilization is derived locally by the pool manager; queue depth
//! and job wait times come from whatever backs this trait (the CI
//! platform's API, a webhook-fed aggregator). Failures are surfaced as
//! `anyhow::Error` and wrapped into `ScalerError::Metrics` by the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Queue-side load signals for one repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Jobs waiting for an available runner.
    pub queue_depth: u32,
    /// Average wait before a job is picked up, in seconds.
    pub avg_wait_secs: f64,
    /// Jobs currently executing.
    pub active_jobs: u32,
}

/// Supplies per-repository queue metrics to the auto-scaler.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn queue_metrics(&self, repository: &str) -> anyhow::Result<QueueMetrics>;
}
