//! runforge-pool — runner pool lifecycle and bounded scaling primitives.
//!
//! The `PoolManager` owns the authoritative record of each repository's
//! pool (bounds, current size) and its runner set. Pools are created
//! lazily on first reference; scale-up requests are clamped to
//! `max_runners` and scale-down reaps idle runners without undercutting
//! `min_runners`, so the bounds invariant holds after every successful
//! scaling operation.
//!
//! Runner instances are provisioned and terminated through the
//! [`ContainerRuntime`] collaborator trait; this crate never creates
//! processes itself.

pub mod error;
pub mod manager;
pub mod runtime;

pub use error::{PoolError, PoolResult};
pub use manager::{
    PoolDefaults, PoolManager, PoolMetrics, PoolUpdate, ScaleOutcome, ScalingGuard,
};
pub use runtime::ContainerRuntime;
