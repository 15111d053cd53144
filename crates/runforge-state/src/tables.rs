//! redb table definitions for the RunForge state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Composite keys follow the pattern `{repository}` or
//! `{parent_key}:{child_key}` to enable prefix scans for related records.

use redb::TableDefinition;

/// Runner pools keyed by `{repository}`.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

/// Runners keyed by `{repository}:{runner_id}`.
pub const RUNNERS: TableDefinition<&str, &[u8]> = TableDefinition::new("runners");

/// Routing rules keyed by `{rule_id}`.
pub const RULES: TableDefinition<&str, &[u8]> = TableDefinition::new("rules");

/// Scaling policies keyed by `{repository}`.
pub const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("policies");

/// Scaling metric snapshots keyed by `{repository}:{epoch}`.
pub const HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("history");

/// Per-second rule match buckets keyed by `{rule_id}:{epoch}`.
pub const RULE_MATCHES: TableDefinition<&str, &[u8]> = TableDefinition::new("rule_matches");
