//! Job router — evaluates routing rules and selects eligible runners.
//!
//! The router is read-only with respect to pools and runners: it produces
//! a dispatch decision (matched rule, target pool, eligible runner set)
//! and the caller chooses among the returned runners. Pool sizes may
//! change between the decision and dispatch, so callers re-validate
//! runner availability before actually assigning a job.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use runforge_state::*;

use crate::error::{RouterError, RouterResult};
use crate::rules::{
    condition_matches, describe_condition, rule_matches, sort_for_evaluation, validate_rule,
};

/// An incoming CI job, as delivered by the (out-of-scope) webhook layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub repository: String,
    pub workflow: Option<String>,
    /// Labels the job requests, e.g. `["self-hosted", "gpu"]`.
    pub labels: Vec<String>,
    pub run_id: u64,
}

/// The outcome of routing one job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteDecision {
    /// The rule that selected the target, if any; `None` means the
    /// default-pool fallback was used.
    pub matched_rule: Option<RoutingRule>,
    pub pool_name: String,
    /// All eligible runners, not a single pick — the caller chooses.
    pub target_runners: Vec<Runner>,
    pub reason: String,
}

/// Per-condition outcome in a rule test report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionOutcome {
    pub description: String,
    pub passed: bool,
}

/// Result of evaluating a hypothetical rule against a sample job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleTestReport {
    pub matched: bool,
    pub conditions: Vec<ConditionOutcome>,
}

/// Match count for one rule over a queried window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleMatchStats {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub matches: u64,
}

/// A label seen on existing runners, with how many runners carry it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelSuggestion {
    pub label: String,
    pub runner_count: u32,
}

/// Routes jobs to pools and eligible runners by evaluating prioritized
/// routing rules.
pub struct JobRouter {
    state: StateStore,
}

impl JobRouter {
    /// Create a new router over the shared state store.
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Route a job: find the first matching enabled rule (or fall back to
    /// the repository's default pool) and return the eligible runner set.
    ///
    /// Records a rule match for analytics when a rule was selected. Pool
    /// and runner state are never mutated.
    pub fn route_job(&self, job: &Job) -> RouterResult<RouteDecision> {
        let decision = self.decide(job)?;
        if let Some(rule) = &decision.matched_rule {
            self.state.record_rule_match(&rule.id, epoch_secs())?;
        }
        info!(
            repository = %job.repository,
            run_id = job.run_id,
            pool = %decision.pool_name,
            rule = decision.matched_rule.as_ref().map(|r| r.name.as_str()).unwrap_or("-"),
            eligible = decision.target_runners.len(),
            "job routed"
        );
        Ok(decision)
    }

    /// Same matching logic as [`route_job`](Self::route_job), with no
    /// analytics write — for operator dry-runs.
    pub fn preview_routing(&self, job: &Job) -> RouterResult<RouteDecision> {
        self.decide(job)
    }

    /// Evaluate a hypothetical rule against a sample job, reporting each
    /// condition's outcome. No side effects; the rule need not be stored.
    pub fn test_rule(&self, rule: &RoutingRule, job: &Job) -> RuleTestReport {
        let conditions: Vec<ConditionOutcome> = rule
            .conditions
            .iter()
            .map(|c| ConditionOutcome {
                description: describe_condition(c),
                passed: condition_matches(c, job),
            })
            .collect();
        RuleTestReport {
            matched: conditions.iter().all(|c| c.passed),
            conditions,
        }
    }

    fn decide(&self, job: &Job) -> RouterResult<RouteDecision> {
        let mut rules: Vec<RoutingRule> = self
            .state
            .list_rules()?
            .into_iter()
            .filter(|r| r.enabled)
            .collect();
        sort_for_evaluation(&mut rules);

        let matched = rules.into_iter().find(|r| rule_matches(r, job));

        let (pool_name, required_labels) = match &matched {
            Some(rule) => (
                rule.targets
                    .pool
                    .clone()
                    .unwrap_or_else(|| job.repository.clone()),
                rule.targets.runner_labels.clone(),
            ),
            // No rule matched: default pool keyed by the job's repository,
            // with the job's own labels as the filter.
            None => (job.repository.clone(), job.labels.clone()),
        };

        let target_runners: Vec<Runner> = self
            .state
            .list_runners_for_repo(&pool_name)?
            .into_iter()
            .filter(|r| r.status == RunnerStatus::Idle && r.has_labels(&required_labels))
            .collect();

        let reason = if target_runners.is_empty() {
            "no eligible runners".to_string()
        } else if let Some(rule) = &matched {
            format!("matched rule \"{}\"", rule.name)
        } else {
            format!("default pool for {}", job.repository)
        };

        debug!(
            repository = %job.repository,
            pool = %pool_name,
            eligible = target_runners.len(),
            %reason,
            "routing decision"
        );

        Ok(RouteDecision {
            matched_rule: matched,
            pool_name,
            target_runners,
            reason,
        })
    }

    // ── Rule management ────────────────────────────────────────────

    /// Validate and store a new rule. The creation timestamp is stamped
    /// here and becomes the stable tie-break for equal priorities.
    pub fn create_rule(&self, mut rule: RoutingRule) -> RouterResult<RoutingRule> {
        validate_rule(&rule).map_err(RouterError::InvalidRule)?;
        if self.state.get_rule(&rule.id)?.is_some() {
            return Err(RouterError::InvalidRule(format!(
                "rule id already exists: {}",
                rule.id
            )));
        }
        rule.created_at = epoch_secs();
        self.state.put_rule(&rule)?;
        info!(rule_id = %rule.id, name = %rule.name, "routing rule created");
        Ok(rule)
    }

    /// Validate and replace an existing rule. `created_at` is preserved
    /// so the evaluation-order tie-break stays stable across updates.
    pub fn update_rule(&self, mut rule: RoutingRule) -> RouterResult<RoutingRule> {
        let existing = self
            .state
            .get_rule(&rule.id)?
            .ok_or_else(|| RouterError::RuleNotFound(rule.id.clone()))?;
        validate_rule(&rule).map_err(RouterError::InvalidRule)?;
        rule.created_at = existing.created_at;
        self.state.put_rule(&rule)?;
        info!(rule_id = %rule.id, "routing rule updated");
        Ok(rule)
    }

    /// Get a rule by ID.
    pub fn get_rule(&self, rule_id: &str) -> RouterResult<RoutingRule> {
        self.state
            .get_rule(rule_id)?
            .ok_or_else(|| RouterError::RuleNotFound(rule_id.to_string()))
    }

    /// All rules in evaluation order (enabled and disabled alike).
    pub fn list_rules(&self) -> RouterResult<Vec<RoutingRule>> {
        let mut rules = self.state.list_rules()?;
        sort_for_evaluation(&mut rules);
        Ok(rules)
    }

    /// Delete a rule by ID.
    pub fn delete_rule(&self, rule_id: &str) -> RouterResult<()> {
        if !self.state.delete_rule(rule_id)? {
            return Err(RouterError::RuleNotFound(rule_id.to_string()));
        }
        info!(%rule_id, "routing rule deleted");
        Ok(())
    }

    // ── Analytics ──────────────────────────────────────────────────

    /// Match counts per stored rule over the trailing window, most
    /// matched first.
    pub fn routing_analytics(&self, window_secs: u64) -> RouterResult<Vec<RuleMatchStats>> {
        let since = epoch_secs().saturating_sub(window_secs);
        let counts = self.state.count_rule_matches_since(since)?;

        let mut stats: Vec<RuleMatchStats> = self
            .state
            .list_rules()?
            .into_iter()
            .map(|rule| RuleMatchStats {
                matches: counts.get(&rule.id).copied().unwrap_or(0),
                rule_id: rule.id,
                rule_name: rule.name,
            })
            .collect();
        stats.sort_by(|a, b| b.matches.cmp(&a.matches).then(a.rule_id.cmp(&b.rule_id)));
        Ok(stats)
    }

    /// Distinct labels aggregated from existing runners, most common
    /// first — offered to operators composing rule targets.
    pub fn label_suggestions(&self) -> RouterResult<Vec<LabelSuggestion>> {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for runner in self.state.list_all_runners()? {
            for label in runner.labels {
                *counts.entry(label).or_insert(0) += 1;
            }
        }
        let mut suggestions: Vec<LabelSuggestion> = counts
            .into_iter()
            .map(|(label, runner_count)| LabelSuggestion {
                label,
                runner_count,
            })
            .collect();
        suggestions.sort_by(|a, b| {
            b.runner_count
                .cmp(&a.runner_count)
                .then(a.label.cmp(&b.label))
        });
        Ok(suggestions)
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
