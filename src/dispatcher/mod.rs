//! Worker pools that lease jobs per operation type and run their handlers.
//!
//! Each operation type gets a fixed number of workers. A worker holds at
//! most one lease at a time, so the pool size bounds concurrency per type.
//! Failures go through the `RetryController`; expired leases are recovered
//! by `QueueMaintenance`.

mod maintenance;
mod retry_controller;
mod retry_policy;
mod shutdown;
mod worker;

pub use maintenance::{MaintenanceReport, QueueMaintenance};
pub use retry_controller::{FailureDisposition, RetryController};
pub use retry_policy::RetryPolicy;
pub use shutdown::{wait_for_signal, ShutdownCoordinator, ShutdownReport};

use crate::config::{QueueSettings, WorkerSettings};
use crate::handlers::HandlerRegistry;
use crate::job_queue::{JobQueue, OperationType};
use crate::status_tracker::StatusTracker;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use worker::{Worker, WorkerContext};

struct WorkerPool {
    operation_type: OperationType,
    in_flight: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
}

/// Running worker pools plus the maintenance task.
pub struct Dispatcher {
    pools: Vec<WorkerPool>,
    maintenance: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Spawn every worker pool and the maintenance task.
    ///
    /// Must be called within a tokio runtime. Cancelling `shutdown` stops
    /// leasing; use `ShutdownCoordinator` to drain.
    pub fn start(
        queue: &JobQueue,
        registry: Arc<HandlerRegistry>,
        tracker: StatusTracker,
        settings: &QueueSettings,
        workers: &WorkerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let store = queue.store().clone();
        let controller = Arc::new(RetryController::new(
            store.clone(),
            RetryPolicy::new(settings),
            tracker.clone(),
        ));
        let ctx = Arc::new(WorkerContext {
            store: store.clone(),
            registry: registry.clone(),
            controller: controller.clone(),
            tracker: tracker.clone(),
            lease_timeout: settings.lease_timeout,
            poll_interval: settings.poll_interval,
            progress_buffer: settings.progress_buffer,
            shutdown: shutdown.clone(),
        });

        let pools = OperationType::ALL
            .iter()
            .map(|&operation_type| {
                let concurrency = workers.concurrency(operation_type);
                if !registry.supports(operation_type) {
                    warn!(
                        "No handler registered for {}, its jobs will fail",
                        operation_type
                    );
                }
                let in_flight = Arc::new(AtomicUsize::new(0));
                let handles = (0..concurrency)
                    .map(|index| {
                        let worker = Worker::new(
                            operation_type,
                            index,
                            ctx.clone(),
                            queue.wakeup(operation_type),
                            in_flight.clone(),
                        );
                        tokio::spawn(worker.run())
                    })
                    .collect();
                info!("Started {} worker(s) for {}", concurrency, operation_type);
                WorkerPool {
                    operation_type,
                    in_flight,
                    workers: handles,
                }
            })
            .collect();

        let maintenance = QueueMaintenance::new(store, controller, tracker, settings);
        let maintenance = tokio::spawn(maintenance.run(shutdown.clone()));

        Self {
            pools,
            maintenance,
            shutdown,
        }
    }

    /// Jobs of this type currently being executed.
    pub fn in_flight(&self, operation_type: OperationType) -> usize {
        self.pool(operation_type)
            .map(|pool| pool.in_flight.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn total_in_flight(&self) -> usize {
        self.pools
            .iter()
            .map(|pool| pool.in_flight.load(Ordering::SeqCst))
            .sum()
    }

    pub fn worker_count(&self, operation_type: OperationType) -> usize {
        self.pool(operation_type)
            .map(|pool| pool.workers.len())
            .unwrap_or(0)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop leasing and hand back the tasks to wait on.
    pub(crate) fn stop(self) -> (Vec<JoinHandle<()>>, JoinHandle<()>) {
        self.shutdown.cancel();
        let workers = self
            .pools
            .into_iter()
            .flat_map(|pool| pool.workers)
            .collect();
        (workers, self.maintenance)
    }

    fn pool(&self, operation_type: OperationType) -> Option<&WorkerPool> {
        self.pools
            .iter()
            .find(|pool| pool.operation_type == operation_type)
    }
}
