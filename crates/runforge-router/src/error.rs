//! Router error types.

use thiserror::Error;

/// Errors that can occur during routing operations.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid routing rule: {0}")]
    InvalidRule(String),

    #[error("routing rule not found: {0}")]
    RuleNotFound(String),

    #[error("state store error: {0}")]
    State(#[from] runforge_state::StateError),
}

pub type RouterResult<T> = Result<T, RouterError>;
