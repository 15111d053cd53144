//! Shared fixtures for auto-scaler tests: an in-memory environment with a
//! fake container runtime and a scriptable metrics source.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use runforge_pool::{ContainerRuntime, PoolManager};
use runforge_state::{RunnerStatus, StateStore};

use crate::metrics::{MetricsSource, QueueMetrics};
use crate::scaler::AutoScaler;

/// Hands out sequential runner IDs; never fails unless told to.
pub(crate) struct FakeRuntime {
    next_id: AtomicU32,
    fail: AtomicBool,
}

impl FakeRuntime {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU32::new(0),
            fail: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn provision(
        &self,
        _repository: &str,
        count: u32,
        _labels: &[String],
    ) -> anyhow::Result<Vec<String>> {
        if self.fail.load(Ordering::Relaxed) {
            anyhow::bail!("runtime unavailable");
        }
        Ok((0..count)
            .map(|_| format!("r-{}", self.next_id.fetch_add(1, Ordering::Relaxed)))
            .collect())
    }

    async fn terminate(&self, _runner_id: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::Relaxed) {
            anyhow::bail!("runtime unavailable");
        }
        Ok(())
    }
}

/// Returns whatever queue metrics the test scripted per repository.
pub(crate) struct StaticMetrics {
    values: std::sync::Mutex<HashMap<String, QueueMetrics>>,
    failing: AtomicBool,
}

impl StaticMetrics {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            values: std::sync::Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
        })
    }

    pub(crate) fn set(&self, repository: &str, metrics: QueueMetrics) {
        self.values
            .lock()
            .unwrap()
            .insert(repository.to_string(), metrics);
    }

    pub(crate) fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

#[async_trait]
impl MetricsSource for StaticMetrics {
    async fn queue_metrics(&self, repository: &str) -> anyhow::Result<QueueMetrics> {
        if self.failing.load(Ordering::Relaxed) {
            anyhow::bail!("metrics source unavailable");
        }
        Ok(self
            .values
            .lock()
            .unwrap()
            .get(repository)
            .copied()
            .unwrap_or_default())
    }
}

/// One fully wired in-memory control plane.
pub(crate) struct TestEnv {
    pub(crate) state: StateStore,
    pub(crate) pools: Arc<PoolManager>,
    pub(crate) metrics: Arc<StaticMetrics>,
    pub(crate) scaler: AutoScaler,
}

impl TestEnv {
    pub(crate) fn new() -> Self {
        let state = StateStore::open_in_memory().unwrap();
        let runtime = FakeRuntime::new();
        let pools = Arc::new(PoolManager::new(state.clone(), runtime));
        let metrics = StaticMetrics::new();
        let scaler = AutoScaler::new(pools.clone(), state.clone(), metrics.clone());
        Self {
            state,
            pools,
            metrics,
            scaler,
        }
    }

    /// Mark every active runner in a pool busy, driving utilization to 1.0.
    pub(crate) async fn mark_all_busy(&self, repository: &str) {
        for runner in self.pools.get_active_runners(repository).await.unwrap() {
            self.pools
                .update_runner_status(&runner.id, RunnerStatus::Busy)
                .await
                .unwrap();
        }
    }
}
