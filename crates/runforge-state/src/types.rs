//! Domain types for the RunForge state store.
//!
//! These types represent the persisted state of runner pools, runners,
//! routing rules, scaling policies, and scaling metric snapshots. All types
//! are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Repository identifier in `owner/name` form.
pub type Repository = String;

/// Unique identifier for a runner.
pub type RunnerId = String;

/// Unique identifier for a routing rule.
pub type RuleId = String;

// ── Pool ──────────────────────────────────────────────────────────

/// Sizing configuration and current size of one repository's runner pool.
///
/// `current_runners` is a cached count maintained by the pool manager; the
/// authoritative runner set lives in the runners table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerPool {
    pub repository: Repository,
    /// Lower bound on pool size. Scale-down never undercuts this.
    pub min_runners: u32,
    /// Upper bound on pool size. Scale-up requests are clamped to this.
    pub max_runners: u32,
    /// Default number of runners added per automatic scale-up.
    pub scale_increment: u32,
    /// Utilization target for this pool, surfaced in pool metrics.
    pub scale_threshold: f64,
    /// Cached runner count, updated after every scaling operation.
    pub current_runners: u32,
    /// Unix timestamp (seconds) when this pool was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when this pool was last updated.
    pub updated_at: u64,
}

impl RunnerPool {
    /// Build the key for the pools table.
    pub fn table_key(&self) -> String {
        self.repository.clone()
    }
}

// ── Runner ────────────────────────────────────────────────────────

/// A named, labeled unit of execution capacity owned by exactly one pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Runner {
    pub id: RunnerId,
    pub name: String,
    pub status: RunnerStatus,
    /// Capability labels, e.g. `["linux", "x64", "gpu"]`. Set semantics.
    pub labels: Vec<String>,
    pub repository: Repository,
    /// Unix timestamp (seconds) when this runner was provisioned.
    pub created_at: u64,
}

/// Lifecycle status of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Idle,
    Busy,
    Offline,
}

impl Runner {
    /// Build the composite key for the runners table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.repository, self.id)
    }

    /// Whether every label in `required` is present on this runner.
    pub fn has_labels(&self, required: &[String]) -> bool {
        required.iter().all(|l| self.labels.contains(l))
    }

    /// Idle or busy — attached to the pool and reachable.
    pub fn is_active(&self) -> bool {
        matches!(self.status, RunnerStatus::Idle | RunnerStatus::Busy)
    }
}

// ── Routing rules ─────────────────────────────────────────────────

/// A prioritized predicate-to-target mapping used to select eligible
/// runners for a job. Rules are independent records; evaluation order is
/// priority descending, then `created_at`, then `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingRule {
    pub id: RuleId,
    pub name: String,
    /// Higher priority is evaluated first.
    pub priority: i64,
    /// All conditions must pass for the rule to match (implicit AND).
    pub conditions: Vec<RuleCondition>,
    pub targets: RuleTargets,
    pub enabled: bool,
    /// Unix timestamp (seconds); the stable tie-break for equal priorities.
    pub created_at: u64,
}

impl RoutingRule {
    /// Build the key for the rules table.
    pub fn table_key(&self) -> String {
        self.id.clone()
    }
}

/// A single routing predicate. The set of kinds is closed; each has an
/// explicit evaluator in the router.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Glob match against the job's repository (`*` matches any run).
    RepositoryPattern { pattern: String },
    /// Exact match against the job's workflow name.
    WorkflowName { name: String },
    /// Every listed label must be present on the job.
    RequiredLabels { labels: Vec<String> },
}

/// Where a matched job is dispatched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleTargets {
    /// Labels a runner must carry to be eligible. Must be non-empty.
    pub runner_labels: Vec<String>,
    /// Explicit pool override; defaults to the job's repository pool.
    pub pool: Option<String>,
}

// ── Scaling policy ────────────────────────────────────────────────

/// Per-repository thresholds and increments driving automatic scaling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingPolicy {
    pub repository: Repository,
    /// Utilization above this triggers scale-up. Range (0.5, 1.0].
    pub scale_up_threshold: f64,
    /// Utilization below this permits scale-down. Range [0.0, 0.5).
    pub scale_down_threshold: f64,
    pub scale_up_increment: u32,
    pub scale_down_increment: u32,
    /// Window after any scaling action during which further automatic
    /// scaling is suppressed.
    pub cooldown_secs: u64,
    /// Queued jobs above this trigger scale-up regardless of utilization.
    pub queue_depth_threshold: u32,
    /// Average job wait above this (seconds) triggers scale-up.
    pub avg_wait_threshold_secs: f64,
}

impl ScalingPolicy {
    /// Build the key for the policies table.
    pub fn table_key(&self) -> String {
        self.repository.clone()
    }

    /// A policy with conservative defaults for a repository that has no
    /// stored override.
    pub fn default_for(repository: &str) -> Self {
        Self {
            repository: repository.to_string(),
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.2,
            scale_up_increment: 1,
            scale_down_increment: 1,
            cooldown_secs: 300,
            queue_depth_threshold: 5,
            avg_wait_threshold_secs: 120.0,
        }
    }

    /// Check all cross-field invariants. Returns a human-readable reason
    /// on the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.scale_up_threshold > 0.5 && self.scale_up_threshold <= 1.0) {
            return Err(format!(
                "scale_up_threshold {} must be in (0.5, 1.0]",
                self.scale_up_threshold
            ));
        }
        if !(self.scale_down_threshold >= 0.0 && self.scale_down_threshold < 0.5) {
            return Err(format!(
                "scale_down_threshold {} must be in [0.0, 0.5)",
                self.scale_down_threshold
            ));
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(format!(
                "scale_down_threshold {} must be below scale_up_threshold {}",
                self.scale_down_threshold, self.scale_up_threshold
            ));
        }
        if self.scale_up_increment == 0 || self.scale_down_increment == 0 {
            return Err("scaling increments must be at least 1".to_string());
        }
        Ok(())
    }
}

// ── Scaling history ───────────────────────────────────────────────

/// Outcome of one auto-scaler evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingDecision {
    ScaleUp,
    ScaleDown,
    Maintain,
}

/// Immutable record of one evaluation, appended to a bounded per-repository
/// history. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingMetricSnapshot {
    pub repository: Repository,
    /// Unix timestamp (seconds); unique per repository (see
    /// `StateStore::append_snapshot`).
    pub epoch: u64,
    pub utilization: f64,
    pub queue_depth: u32,
    pub avg_wait_secs: f64,
    pub runner_count: u32,
    pub active_jobs: u32,
    pub decision: ScalingDecision,
    pub reason: String,
}

impl ScalingMetricSnapshot {
    /// Build the composite key for the history table.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.repository, self.epoch)
    }
}

// ── Routing analytics ─────────────────────────────────────────────

/// Per-second match count for one routing rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleMatchBucket {
    pub rule_id: RuleId,
    pub epoch: u64,
    pub matches: u64,
}

impl RuleMatchBucket {
    /// Build the composite key for the rule matches table.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.rule_id, self.epoch)
    }
}
