//! Operations Queue Library
//!
//! Durable background-job dispatch for user-triggered account operations.
//! Exposes the internal modules for the binary and for integration tests.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod job_queue;
pub mod metrics;
pub mod operation_store;
pub mod sqlite_persistence;
pub mod status_tracker;

// Re-export commonly used types for convenience
pub use dispatcher::{Dispatcher, ShutdownCoordinator, ShutdownReport};
pub use error::QueueError;
pub use handlers::{Handler, HandlerError, HandlerRegistry, ProgressReporter};
pub use job_queue::{
    AuthMethod, JobData, JobId, JobQueue, JobQueueStore, JobRecord, JobStatus, NewJob,
    OperationType, SqliteJobQueueStore,
};
pub use operation_store::{OperationStore, SqliteOperationStore};
pub use status_tracker::StatusTracker;
