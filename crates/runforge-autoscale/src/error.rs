//! Auto-scaler error types.

use thiserror::Error;

/// Errors that can occur during scaling evaluation.
#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("policy validation failed: {0}")]
    PolicyValidation(String),

    #[error("metrics source error: {0}")]
    Metrics(anyhow::Error),

    #[error("pool manager error: {0}")]
    Pool(#[from] runforge_pool::PoolError),

    #[error("state store error: {0}")]
    State(#[from] runforge_state::StateError),
}

impl ScalerError {
    /// Whether this error is a scaling operation already in flight for
    /// the repository — callers back off and retry rather than failing.
    pub fn is_scaling_in_progress(&self) -> bool {
        matches!(
            self,
            ScalerError::Pool(runforge_pool::PoolError::ScalingInProgress(_))
        )
    }
}

pub type ScalerResult<T> = Result<T, ScalerError>;
