#![allow(dead_code)]

use super::constants::*;
use operations_queue::config::{QueueSettings, WorkerSettings};
use operations_queue::job_queue::JobPayload;
use operations_queue::operation_store::{NewOperation, OperationRecord, OperationStore};
use operations_queue::{
    AuthMethod, Dispatcher, HandlerRegistry, JobId, JobQueue, JobQueueStore, JobRecord, JobStatus,
    NewJob, OperationType, ShutdownCoordinator, ShutdownReport, SqliteJobQueueStore,
    SqliteOperationStore, StatusTracker,
};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

/// A queue over on-disk databases in a temporary directory.
pub struct TestQueue {
    dir: TempDir,
    pub store: Arc<SqliteJobQueueStore>,
    pub operations: Arc<dyn OperationStore>,
    pub tracker: StatusTracker,
    pub queue: JobQueue,
    pub settings: QueueSettings,
    dispatcher: Option<Dispatcher>,
}

impl TestQueue {
    /// Timings scaled down so retries and stall recovery happen within a test.
    pub fn fast_settings() -> QueueSettings {
        QueueSettings {
            max_attempts: 3,
            backoff_base: TEST_BACKOFF_BASE,
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
            keep_completed: 100,
            keep_failed: 50,
            lease_timeout: Duration::from_millis(600),
            stall_check_interval: Duration::from_millis(100),
            poll_interval: Duration::from_millis(25),
            shutdown_grace: Duration::from_secs(5),
            progress_buffer: 8,
        }
    }

    /// Open a fresh queue without starting any worker.
    pub fn open(settings: QueueSettings) -> Self {
        Self::open_in(tempdir().unwrap(), settings)
    }

    /// Open the queue stored in `dir`, creating it if needed.
    pub fn open_in(dir: TempDir, settings: QueueSettings) -> Self {
        let operations: Arc<dyn OperationStore> = Arc::new(
            SqliteOperationStore::new(dir.path().join("operations.db")).unwrap(),
        );
        Self::open_with_operations(dir, settings, operations)
    }

    pub fn open_with_operations(
        dir: TempDir,
        settings: QueueSettings,
        operations: Arc<dyn OperationStore>,
    ) -> Self {
        let store = Arc::new(SqliteJobQueueStore::new(dir.path().join("queue.db")).unwrap());
        let tracker = StatusTracker::spawn(operations.clone());
        let queue = JobQueue::new(store.clone(), settings.max_attempts);
        Self {
            dir,
            store,
            operations,
            tracker,
            queue,
            settings,
            dispatcher: None,
        }
    }

    /// Open a fresh queue and start the default worker pools.
    pub async fn spawn(registry: HandlerRegistry) -> Self {
        let mut queue = Self::open(Self::fast_settings());
        queue.start(registry, WorkerSettings::default());
        queue
    }

    pub fn start(&mut self, registry: HandlerRegistry, workers: WorkerSettings) {
        let dispatcher = Dispatcher::start(
            &self.queue,
            Arc::new(registry),
            self.tracker.clone(),
            &self.settings,
            &workers,
            CancellationToken::new(),
        );
        self.dispatcher = Some(dispatcher);
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.dispatcher.as_ref().expect("dispatcher not started")
    }

    /// Create the operation record and enqueue a job for it.
    pub fn enqueue(
        &self,
        operation_type: OperationType,
        auth_method: AuthMethod,
        operation_id: &str,
    ) -> JobId {
        self.enqueue_with(operation_type, auth_method, operation_id, None, json!({}))
    }

    pub fn enqueue_with(
        &self,
        operation_type: OperationType,
        auth_method: AuthMethod,
        operation_id: &str,
        priority: Option<i32>,
        config: JsonValue,
    ) -> JobId {
        self.operations
            .create_operation(&NewOperation {
                id: operation_id.to_string(),
                user_id: TEST_USER_ID.to_string(),
                operation_type: operation_type.as_str().to_string(),
            })
            .unwrap();
        self.enqueue_job(new_job(
            operation_type,
            auth_method,
            operation_id,
            priority,
            config,
        ))
    }

    /// Enqueue without touching the operation store.
    pub fn enqueue_job(&self, job: NewJob) -> JobId {
        self.queue.enqueue(job).unwrap()
    }

    pub fn job(&self, id: JobId) -> JobRecord {
        self.store.get_job(id).unwrap().expect("job should exist")
    }

    /// Poll until the job satisfies `predicate`.
    pub async fn wait_until<F>(&self, id: JobId, predicate: F) -> JobRecord
    where
        F: Fn(&JobRecord) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let job = self.job(id);
            if predicate(&job) {
                return job;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("job {} never reached the expected state: {:?}", id, job);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn wait_for_status(&self, id: JobId, status: JobStatus) -> JobRecord {
        self.wait_until(id, |job| job.status == status).await
    }

    /// Operation record after every pending tracker write was applied.
    pub async fn operation(&self, id: &str) -> OperationRecord {
        self.tracker.flush().await;
        self.operations
            .get_operation(id)
            .unwrap()
            .expect("operation should exist")
    }

    pub async fn shutdown(&mut self) -> ShutdownReport {
        let dispatcher = self.dispatcher.take().expect("dispatcher not started");
        ShutdownCoordinator::new(self.settings.shutdown_grace)
            .shutdown(dispatcher, &self.tracker, self.store.as_ref())
            .await
    }

    /// Give back the directory so the same databases can be reopened.
    pub fn into_dir(self) -> TempDir {
        self.dir
    }
}

pub fn new_job(
    operation_type: OperationType,
    auth_method: AuthMethod,
    operation_id: &str,
    priority: Option<i32>,
    config: JsonValue,
) -> NewJob {
    let job = NewJob::new(
        operation_type,
        JobPayload {
            operation_id: operation_id.to_string(),
            user_id: TEST_USER_ID.to_string(),
            auth_method,
            config,
        },
    );
    match priority {
        Some(priority) => job.with_priority(priority),
        None => job,
    }
}
