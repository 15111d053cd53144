//! Auto-scaler configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Tunables for the evaluation loop and history retention. Loadable from
/// TOML; every field has a default so partial files work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    /// Seconds between scheduled evaluation ticks.
    pub evaluation_interval_secs: u64,
    /// How long metric snapshots are retained per repository.
    pub history_retention_secs: u64,
    /// Sample count at which trend predictions reach full confidence.
    pub min_history_points: usize,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 30,
            history_retention_secs: 86_400,
            min_history_points: 12,
        }
    }
}

impl ScalerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
