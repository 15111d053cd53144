//! Container runtime collaborator interface.
//!
//! The pool manager never creates or destroys runner processes itself; it
//! delegates to whatever backs this trait (Docker, Firecracker, a cloud
//! API). Failures are surfaced as `anyhow::Error` and wrapped into
//! `PoolError::Runtime` by the caller.

use async_trait::async_trait;

/// Provisions and terminates runner instances for a repository's pool.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create `count` runner instances carrying the given labels.
    ///
    /// Returns the runtime-assigned runner IDs, one per instance created.
    /// A partial result is valid: the caller records exactly the runners
    /// that were actually created.
    async fn provision(
        &self,
        repository: &str,
        count: u32,
        labels: &[String],
    ) -> anyhow::Result<Vec<String>>;

    /// Destroy a single runner instance.
    async fn terminate(&self, runner_id: &str) -> anyhow::Result<()>;
}
