//! keelson.toml configuration parser.
//!
//! The cloud and cluster settings live here rather than in process-wide
//! state; the daemon builds one `KeelsonConfig` at startup and hands it to
//! everything that needs it through [`crate::Core`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeelsonConfig {
    pub store: StoreConfig,
    pub supervisor: SupervisorConfig,
    pub cloud: CloudConfig,
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// redb file holding the coordination store.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Size of the worker pool.
    pub workers: usize,
    pub poll_interval_ms: u64,
    /// Attempts budget stamped on every newly enqueued task.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CloudConfig {
    pub region: String,
    pub availability_zone: String,
    pub security_group_id: String,
    pub subnet_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    pub host: String,
    pub username: String,
    pub insecure_https: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/keelson/keelson.redb"),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 1000,
            max_attempts: 10,
        }
    }
}

impl SupervisorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl KeelsonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KeelsonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
