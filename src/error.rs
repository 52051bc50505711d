//! Error taxonomy shared by the queue, the handler registry and the dispatcher.

use crate::job_queue::{JobId, OperationType};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The durable backend is unreachable, closed or failing.
    #[error("queue store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("unknown operation type: {0}")]
    UnknownOperationType(String),

    #[error("operation type {operation_type} has no handler for auth method {auth_method}")]
    UnsupportedAuthMethod {
        operation_type: OperationType,
        auth_method: String,
    },

    /// Anything raised by a handler, including panics and non-zero exits.
    #[error("handler execution failed: {0}")]
    HandlerExecution(String),

    /// The lease on the job was lost before the holder acknowledged it.
    #[error("lease expired for job {0}")]
    LeaseExpired(JobId),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("invalid job: {0}")]
    InvalidJob(String),
}

impl QueueError {
    /// Returns true if a job failing with this error may be attempted again.
    ///
    /// Configuration errors fail the job immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::HandlerExecution(_)
                | QueueError::LeaseExpired(_)
                | QueueError::StoreUnavailable(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueueError::StoreUnavailable(_) => "store_unavailable",
            QueueError::UnknownOperationType(_) => "unknown_operation_type",
            QueueError::UnsupportedAuthMethod { .. } => "unsupported_auth_method",
            QueueError::HandlerExecution(_) => "handler_execution",
            QueueError::LeaseExpired(_) => "lease_expired",
            QueueError::JobNotFound(_) => "job_not_found",
            QueueError::InvalidJob(_) => "invalid_job",
        }
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::StoreUnavailable(e.to_string())
    }
}
