mod file_config;

pub use file_config::{FileConfig, HandlerConfig, QueueConfig, WorkersConfig};

use crate::handlers::CommandHandlerSettings;
use crate::job_queue::{AuthMethod, OperationType};
use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that take part in config resolution.
/// TOML values override these where present.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub metrics_port: u16,
}

/// Retry, retention and timing policy of the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    /// Number of completed jobs kept after pruning.
    pub keep_completed: usize,
    /// Number of failed jobs kept after pruning.
    pub keep_failed: usize,
    pub lease_timeout: Duration,
    pub stall_check_interval: Duration,
    /// Upper bound on how long an idle worker waits before polling again.
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    pub progress_buffer: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(2000),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(3600),
            keep_completed: 100,
            keep_failed: 50,
            lease_timeout: Duration::from_secs(30),
            stall_check_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
            progress_buffer: 32,
        }
    }
}

impl QueueSettings {
    fn from_file(file: QueueConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: file.max_attempts.unwrap_or(defaults.max_attempts),
            backoff_base: file
                .backoff_base_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_base),
            backoff_multiplier: file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
            max_backoff: file
                .max_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            keep_completed: file.keep_completed.unwrap_or(defaults.keep_completed),
            keep_failed: file.keep_failed.unwrap_or(defaults.keep_failed),
            lease_timeout: file
                .lease_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.lease_timeout),
            stall_check_interval: file
                .stall_check_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.stall_check_interval),
            poll_interval: file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            shutdown_grace: file
                .shutdown_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
            progress_buffer: file.progress_buffer.unwrap_or(defaults.progress_buffer),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("queue.max_attempts must be at least 1");
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            bail!(
                "queue.backoff_multiplier must be a finite number of at least 1.0, got {}",
                self.backoff_multiplier
            );
        }
        if self.lease_timeout.is_zero() {
            bail!("queue.lease_timeout_secs must be greater than 0");
        }
        if self.stall_check_interval.is_zero() {
            bail!("queue.stall_check_interval_secs must be greater than 0");
        }
        if self.poll_interval.is_zero() {
            bail!("queue.poll_interval_ms must be greater than 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub unfollow_non_followers: usize,
    pub unfollow_everyone: usize,
    pub detect_unfollowers: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            unfollow_non_followers: 2,
            unfollow_everyone: 2,
            detect_unfollowers: 3,
        }
    }
}

impl WorkerSettings {
    pub fn concurrency(&self, operation_type: OperationType) -> usize {
        match operation_type {
            OperationType::UnfollowNonFollowers => self.unfollow_non_followers,
            OperationType::UnfollowEveryone => self.unfollow_everyone,
            OperationType::DetectUnfollowers => self.detect_unfollowers,
        }
    }

    fn from_file(file: WorkersConfig) -> Self {
        let defaults = Self::default();
        Self {
            unfollow_non_followers: file
                .unfollow_non_followers
                .unwrap_or(defaults.unfollow_non_followers),
            unfollow_everyone: file.unfollow_everyone.unwrap_or(defaults.unfollow_everyone),
            detect_unfollowers: file
                .detect_unfollowers
                .unwrap_or(defaults.detect_unfollowers),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for operation_type in OperationType::ALL {
            if self.concurrency(operation_type) == 0 {
                bail!("workers for {} must be at least 1", operation_type);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub operation_type: OperationType,
    pub auth_method: AuthMethod,
    pub command: CommandHandlerSettings,
}

impl HandlerSettings {
    fn from_file(file: HandlerConfig) -> Result<Self> {
        let operation_type = OperationType::from_str(&file.operation_type)
            .ok_or_else(|| anyhow!("Unknown operation type in handler config: {}", file.operation_type))?;
        let auth_method = AuthMethod::from_str(&file.auth_method)
            .ok_or_else(|| anyhow!("Unknown auth method in handler config: {}", file.auth_method))?;
        if file.program.trim().is_empty() {
            bail!(
                "Handler for {} ({}) has an empty program",
                operation_type,
                auth_method
            );
        }
        Ok(Self {
            operation_type,
            auth_method,
            command: CommandHandlerSettings {
                program: file.program,
                args: file.args,
                timeout: file.timeout_secs.map(Duration::from_secs),
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    /// 0 disables the metrics endpoint.
    pub metrics_port: u16,
    pub queue: QueueSettings,
    pub workers: WorkerSettings,
    pub handlers: Vec<HandlerSettings>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| anyhow!("db_dir must be specified via --db-dir or in config file"))?;
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let queue = QueueSettings::from_file(file.queue.unwrap_or_default());
        queue.validate()?;
        let workers = WorkerSettings::from_file(file.workers.unwrap_or_default());
        workers.validate()?;

        let handlers = file
            .handlers
            .into_iter()
            .map(HandlerSettings::from_file)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            db_dir,
            metrics_port,
            queue,
            workers,
            handlers,
        })
    }

    pub fn queue_db_path(&self) -> PathBuf {
        self.db_dir.join("queue.db")
    }

    pub fn operations_db_path(&self) -> PathBuf {
        self.db_dir.join("operations.db")
    }
}
