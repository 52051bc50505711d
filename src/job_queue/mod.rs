//! Durable, priority-ordered job queue.
//!
//! `JobQueueStore` is the storage contract, `SqliteJobQueueStore` its
//! implementation, and `JobQueue` the producer-facing handle that also wakes
//! idle workers when new work arrives.

mod models;
mod queue_store;
mod schema;

pub use models::*;
pub use queue_store::{JobQueueStore, SqliteJobQueueStore};

use crate::error::QueueError;
use crate::metrics;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Current time as Unix epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Producer handle over a queue store.
///
/// Cheap to clone. The dispatcher shares the same wakeup signals, so an
/// enqueue is picked up without waiting for the next poll.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobQueueStore>,
    max_attempts: u32,
    wakeups: Arc<HashMap<OperationType, Arc<Notify>>>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobQueueStore>, max_attempts: u32) -> Self {
        let wakeups = OperationType::ALL
            .iter()
            .map(|operation_type| (*operation_type, Arc::new(Notify::new())))
            .collect();
        Self {
            store,
            max_attempts,
            wakeups: Arc::new(wakeups),
        }
    }

    /// Persist a job. It is immediately visible to leasing.
    pub fn enqueue(&self, job: NewJob) -> Result<JobId, QueueError> {
        let id = self.store.enqueue(&job, self.max_attempts)?;
        info!(
            "Queued job {} ({}) for operation {} with priority {}",
            id, job.operation_type, job.payload.operation_id, job.priority
        );
        metrics::record_job_enqueued(job.operation_type);
        self.wakeup(job.operation_type).notify_one();
        Ok(id)
    }

    /// Validate loosely typed producer data and enqueue it.
    pub fn enqueue_data(&self, data: JobData) -> Result<JobId, QueueError> {
        self.enqueue(NewJob::try_from(data)?)
    }

    pub fn get_job(&self, id: JobId) -> Result<Option<JobRecord>, QueueError> {
        self.store.get_job(id)
    }

    pub fn counts(&self, operation_type: Option<OperationType>) -> Result<JobCounts, QueueError> {
        self.store.count_by_status(operation_type)
    }

    pub fn store(&self) -> &Arc<dyn JobQueueStore> {
        &self.store
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub(crate) fn wakeup(&self, operation_type: OperationType) -> Arc<Notify> {
        // Every variant is inserted in `new`
        self.wakeups
            .get(&operation_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(Notify::new()))
    }
}
