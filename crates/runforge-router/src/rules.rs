//! Rule condition evaluation and validation.
//!
//! Conditions are a closed, tagged set (`RuleCondition`), each with an
//! explicit evaluator here. Everything in this module is a pure function
//! over borrowed data so the same logic backs live routing, rule testing,
//! and routing previews.

use regex::Regex;

use runforge_state::{RoutingRule, RuleCondition};

use crate::router::Job;

/// Compile a repository glob (`*` matches any run of characters) into an
/// anchored regex.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(pattern).replace("\\*", ".*");
    Regex::new(&format!("^{escaped}$"))
}

/// Evaluate a single condition against a job.
pub fn condition_matches(condition: &RuleCondition, job: &Job) -> bool {
    match condition {
        RuleCondition::RepositoryPattern { pattern } => match compile_pattern(pattern) {
            Ok(re) => re.is_match(&job.repository),
            // Validated at rule creation; an uncompilable stored pattern
            // never matches.
            Err(_) => false,
        },
        RuleCondition::WorkflowName { name } => {
            job.workflow.as_deref() == Some(name.as_str())
        }
        RuleCondition::RequiredLabels { labels } => {
            labels.iter().all(|l| job.labels.contains(l))
        }
    }
}

/// Human-readable form of a condition, for rule test reports.
pub fn describe_condition(condition: &RuleCondition) -> String {
    match condition {
        RuleCondition::RepositoryPattern { pattern } => {
            format!("repository matches \"{pattern}\"")
        }
        RuleCondition::WorkflowName { name } => format!("workflow is \"{name}\""),
        RuleCondition::RequiredLabels { labels } => {
            format!("job has labels [{}]", labels.join(", "))
        }
    }
}

/// Whether every condition on a rule passes for the job (implicit AND).
/// A rule with no conditions matches every job.
pub fn rule_matches(rule: &RoutingRule, job: &Job) -> bool {
    rule.conditions.iter().all(|c| condition_matches(c, job))
}

/// Sort rules into evaluation order: priority descending, then creation
/// time, then ID. The trailing keys make routing deterministic for
/// identical inputs even when priorities tie.
pub fn sort_for_evaluation(rules: &mut [RoutingRule]) {
    rules.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

/// Check a rule definition for malformations. Called at create/update
/// time so routing never has to handle a bad rule.
pub fn validate_rule(rule: &RoutingRule) -> Result<(), String> {
    if rule.id.trim().is_empty() {
        return Err("rule id must not be empty".to_string());
    }
    if rule.name.trim().is_empty() {
        return Err("rule name must not be empty".to_string());
    }
    if rule.targets.runner_labels.is_empty() {
        return Err("targets.runner_labels must not be empty".to_string());
    }
    for condition in &rule.conditions {
        match condition {
            RuleCondition::RepositoryPattern { pattern } => {
                if pattern.trim().is_empty() {
                    return Err("repository pattern must not be empty".to_string());
                }
                compile_pattern(pattern)
                    .map_err(|e| format!("repository pattern \"{pattern}\": {e}"))?;
            }
            RuleCondition::WorkflowName { name } => {
                if name.trim().is_empty() {
                    return Err("workflow name must not be empty".to_string());
                }
            }
            RuleCondition::RequiredLabels { labels } => {
                if labels.is_empty() {
                    return Err("required labels list must not be empty".to_string());
                }
            }
        }
    }
    Ok(())
}
