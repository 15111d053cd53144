//! runforge-state — embedded state store for RunForge.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for runner pools, runners, routing rules, scaling
//! policies, and scaling metric history.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{repository}`, `{repository}:{runner_id}`,
//! `{repository}:{epoch}`) enable efficient prefix scans for related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
