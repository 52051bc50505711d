//! Data models for the job queue.
//!
//! Defines job records, lifecycle statuses, operation types and the producer
//! payload.

use crate::error::QueueError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Identifier allocated by the store at enqueue time. Increases monotonically.
pub type JobId = i64;

/// Priority used when the producer does not specify one. Lower sorts first.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Closed set of operations the dispatcher knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    UnfollowNonFollowers,
    UnfollowEveryone,
    DetectUnfollowers,
}

impl OperationType {
    pub const ALL: [OperationType; 3] = [
        OperationType::UnfollowNonFollowers,
        OperationType::UnfollowEveryone,
        OperationType::DetectUnfollowers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::UnfollowNonFollowers => "unfollowNonFollowers",
            OperationType::UnfollowEveryone => "unfollowEveryone",
            OperationType::DetectUnfollowers => "detectUnfollowers",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unfollowNonFollowers" => Some(OperationType::UnfollowNonFollowers),
            "unfollowEveryone" => Some(OperationType::UnfollowEveryone),
            "detectUnfollowers" => Some(OperationType::DetectUnfollowers),
            _ => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution strategy of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Browser-automation driven by a stored login session.
    Session,
    /// Programmatic calls to the platform API.
    Api,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Session => "session",
            AuthMethod::Api => "api",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "session" => Some(AuthMethod::Session),
            "api" => Some(AuthMethod::Api),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Active,
    Completed, // terminal
    Failed,    // terminal
    Stalled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Active,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Stalled,
    ];

    /// Returns true if this is a terminal state (Completed or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stalled => "stalled",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "active" => Some(JobStatus::Active),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "stalled" => Some(JobStatus::Stalled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Data carried by a job to its handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    /// Key of the externally owned operation record. Never changes.
    pub operation_id: String,
    pub user_id: String,
    pub auth_method: AuthMethod,
    /// Handler-specific settings, passed through untouched.
    #[serde(default)]
    pub config: JsonValue,
}

/// A job as submitted by a producer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub operation_type: OperationType,
    pub payload: JobPayload,
    pub priority: i32,
}

impl NewJob {
    pub fn new(operation_type: OperationType, payload: JobPayload) -> Self {
        Self {
            operation_type,
            payload,
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Loosely typed producer input, as received from scripts and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    #[serde(rename = "type")]
    pub operation_type: String,
    pub operation_id: String,
    pub user_id: String,
    pub auth_method: String,
    #[serde(default)]
    pub config: JsonValue,
    #[serde(default)]
    pub priority: Option<i32>,
}

impl TryFrom<JobData> for NewJob {
    type Error = QueueError;

    fn try_from(data: JobData) -> Result<Self, Self::Error> {
        let operation_type = OperationType::from_str(&data.operation_type)
            .ok_or_else(|| QueueError::UnknownOperationType(data.operation_type.clone()))?;
        let auth_method = AuthMethod::from_str(&data.auth_method).ok_or_else(|| {
            QueueError::InvalidJob(format!("unknown auth method: {}", data.auth_method))
        })?;
        if data.operation_id.is_empty() {
            return Err(QueueError::InvalidJob("operationId must not be empty".into()));
        }

        Ok(NewJob {
            operation_type,
            payload: JobPayload {
                operation_id: data.operation_id,
                user_id: data.user_id,
                auth_method,
                config: data.config,
            },
            priority: data.priority.unwrap_or(DEFAULT_PRIORITY),
        })
    }
}

/// A job as persisted in the queue store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    pub payload: JobPayload,
    pub priority: i32,
    /// Number of concluded execution attempts.
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Earliest time the job may be leased.
    pub available_at: i64,
    pub started_at: Option<i64>,
    pub lease_expires_at: Option<i64>,
    pub finished_at: Option<i64>,
    /// Last progress message reported by the handler.
    pub progress: Option<String>,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
}

impl JobRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn operation_id(&self) -> &str {
        &self.payload.operation_id
    }
}

/// Exclusive, time-bounded claim on one job.
#[derive(Debug, Clone)]
pub struct Lease {
    pub job: JobRecord,
    /// Binds acknowledgments to this particular lease.
    pub token: String,
    pub expires_at: i64,
}

impl Lease {
    pub fn job_id(&self) -> JobId {
        self.job.id
    }
}

/// Final outcome reported when acknowledging a lease.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { result: JsonValue },
    Failed { error: String },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed { .. } => JobStatus::Completed,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Acknowledged,
    /// The same outcome had already been recorded for this lease.
    AlreadyAcknowledged,
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub stalled: usize,
}

impl JobCounts {
    pub fn get(&self, status: JobStatus) -> usize {
        match status {
            JobStatus::Queued => self.queued,
            JobStatus::Active => self.active,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Stalled => self.stalled,
        }
    }

    pub(crate) fn set(&mut self, status: JobStatus, count: usize) {
        match status {
            JobStatus::Queued => self.queued = count,
            JobStatus::Active => self.active = count,
            JobStatus::Completed => self.completed = count,
            JobStatus::Failed => self.failed = count,
            JobStatus::Stalled => self.stalled = count,
        }
    }
}
