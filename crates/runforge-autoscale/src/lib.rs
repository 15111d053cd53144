//! runforge-autoscale — policy-driven pool scaling.
//!
//! Evaluates every tracked repository on an interval: pool utilization
//! (from the pool manager) and queue depth / wait times (from the
//! [`MetricsSource`] collaborator) are compared against the repository's
//! `ScalingPolicy`, and the pool manager is invoked when thresholds are
//! crossed. Cooldown windows prevent thrashing.
//!
//! # Decision Logic
//!
//! ```text
//! scale-up   if utilization > scale_up_threshold
//!            or queue_depth > queue_depth_threshold
//!            or avg_wait > avg_wait_threshold
//!            — provided not in cooldown and current < max
//!
//! scale-down if utilization < scale_down_threshold and queue_depth == 0
//!            — provided not in cooldown and current > min
//!
//! maintain   otherwise (and always during cooldown)
//! ```
//!
//! Every evaluation appends an immutable snapshot to a bounded
//! per-repository history, which also feeds linear-trend predictions
//! (`predict_scaling_needs`) and the fleet dashboard.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod metrics;
pub mod predict;
pub mod scaler;

#[cfg(test)]
mod testutil;

pub use config::ScalerConfig;
pub use dashboard::{DashboardSnapshot, RepoStatus, ScaleRecommendation};
pub use error::{ScalerError, ScalerResult};
pub use metrics::{MetricsSource, QueueMetrics};
pub use predict::Prediction;
pub use scaler::{AutoScaler, Evaluation, PolicyStatus, PolicyUpdate};
