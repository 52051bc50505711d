use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub metrics_port: Option<u16>,

    pub queue: Option<QueueConfig>,
    pub workers: Option<WorkersConfig>,
    pub handlers: Vec<HandlerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct QueueConfig {
    pub max_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_backoff_ms: Option<u64>,
    pub keep_completed: Option<usize>,
    pub keep_failed: Option<usize>,
    pub lease_timeout_secs: Option<u64>,
    pub stall_check_interval_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub progress_buffer: Option<usize>,
}

/// Worker pool size per operation type.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WorkersConfig {
    pub unfollow_non_followers: Option<usize>,
    pub unfollow_everyone: Option<usize>,
    pub detect_unfollowers: Option<usize>,
}

/// An external program handling one operation type for one auth method.
#[derive(Debug, Deserialize, Clone)]
pub struct HandlerConfig {
    pub operation_type: String,
    pub auth_method: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
