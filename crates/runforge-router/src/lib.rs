//! runforge-router — prioritized job routing.
//!
//! Evaluates an ordered set of routing rules against an incoming job's
//! repository, workflow, and labels, and produces a dispatch decision:
//! the matched rule (if any), the target pool, and every eligible idle
//! runner. Rule order is priority descending with a stable creation-time
//! tie-break, so identical inputs always route identically.
//!
//! Routing is read-only; it never changes pool size. `test_rule` and
//! `preview_routing` run the same matching logic without side effects.

pub mod error;
pub mod router;
pub mod rules;

pub use error::{RouterError, RouterResult};
pub use router::{
    ConditionOutcome, Job, JobRouter, LabelSuggestion, RouteDecision, RuleMatchStats,
    RuleTestReport,
};
