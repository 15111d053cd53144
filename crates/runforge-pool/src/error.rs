//! Pool manager error types.

use thiserror::Error;

/// Errors that can occur during pool management operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("pool not found: {0}")]
    PoolNotFound(String),

    #[error("runner not found: {0}")]
    RunnerNotFound(String),

    #[error("scaling already in progress for: {0}")]
    ScalingInProgress(String),

    #[error("container runtime error: {0}")]
    Runtime(#[from] anyhow::Error),

    #[error("state store error: {0}")]
    State(#[from] runforge_state::StateError),
}

pub type PoolResult<T> = Result<T, PoolError>;
