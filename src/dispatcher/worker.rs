//! A single queue consumer bound to one operation type.

use super::retry_controller::RetryController;
use crate::error::QueueError;
use crate::handlers::{HandlerError, HandlerRegistry, ProgressReporter};
use crate::job_queue::{AckStatus, JobOutcome, JobQueueStore, Lease, OperationType};
use crate::metrics;
use crate::status_tracker::StatusTracker;
use futures::FutureExt;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// State shared by every worker of a dispatcher.
pub(crate) struct WorkerContext {
    pub store: Arc<dyn JobQueueStore>,
    pub registry: Arc<HandlerRegistry>,
    pub controller: Arc<RetryController>,
    pub tracker: StatusTracker,
    pub lease_timeout: Duration,
    pub poll_interval: Duration,
    pub progress_buffer: usize,
    pub shutdown: CancellationToken,
}

impl WorkerContext {
    /// Leases are renewed three times per timeout window.
    fn heartbeat_period(&self) -> Duration {
        (self.lease_timeout / 3).max(MIN_HEARTBEAT)
    }
}

type Execution = Result<Result<JsonValue, HandlerError>, Box<dyn Any + Send>>;

pub(crate) struct Worker {
    name: String,
    operation_type: OperationType,
    ctx: Arc<WorkerContext>,
    wakeup: Arc<Notify>,
    in_flight: Arc<AtomicUsize>,
}

impl Worker {
    pub fn new(
        operation_type: OperationType,
        index: usize,
        ctx: Arc<WorkerContext>,
        wakeup: Arc<Notify>,
        in_flight: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            name: format!("{}-worker-{}", operation_type, index),
            operation_type,
            ctx,
            wakeup,
            in_flight,
        }
    }

    /// Lease and process jobs until shutdown is requested.
    ///
    /// Cancellation is only observed between jobs, so a job in progress
    /// always runs to completion unless the task is aborted.
    pub async fn run(self) {
        debug!("{} started", self.name);
        while !self.ctx.shutdown.is_cancelled() {
            match self
                .ctx
                .store
                .lease_next(self.operation_type, self.ctx.lease_timeout)
            {
                Ok(Some(lease)) => {
                    self.process(lease).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!("{} failed to lease a job: {}", self.name, e),
            }

            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(self.ctx.poll_interval) => {}
            }
        }
        debug!("{} stopped", self.name);
    }

    async fn process(&self, lease: Lease) {
        let _in_flight = InFlightGuard::enter(self.in_flight.clone(), self.operation_type);
        let job = &lease.job;
        info!(
            "{} processing job {} for operation {}, attempt {}/{}",
            self.name,
            job.id,
            job.operation_id(),
            job.attempts + 1,
            job.max_attempts
        );

        let handler = match self
            .ctx
            .registry
            .resolve(job.operation_type, job.payload.auth_method)
        {
            Ok(handler) => handler,
            Err(e) => {
                warn!("{} cannot run job {}: {}", self.name, job.id, e);
                self.fail(&lease, e);
                return;
            }
        };

        let (reporter, progress) = ProgressReporter::channel(self.ctx.progress_buffer);
        let started = Instant::now();
        let execution = AssertUnwindSafe(handler.execute(
            &job.payload.user_id,
            &job.payload.config,
            reporter,
        ))
        .catch_unwind();
        let outcome = self.supervise(&lease, execution, progress).await;
        metrics::record_job_duration(job.operation_type, started.elapsed());

        match outcome {
            Ok(Ok(result)) => self.complete(&lease, result),
            Ok(Err(e)) => self.fail(&lease, QueueError::HandlerExecution(e.to_string())),
            Err(panic) => {
                let message = format!("handler panicked: {}", panic_message(panic.as_ref()));
                self.fail(&lease, QueueError::HandlerExecution(message));
            }
        }
    }

    /// Drive the handler while relaying its progress and renewing the lease.
    async fn supervise<F>(
        &self,
        lease: &Lease,
        execution: F,
        mut progress: mpsc::Receiver<String>,
    ) -> Execution
    where
        F: Future<Output = Execution>,
    {
        tokio::pin!(execution);
        let mut heartbeat = tokio::time::interval(self.ctx.heartbeat_period());
        heartbeat.tick().await;
        let mut progress_open = true;

        let outcome = loop {
            tokio::select! {
                outcome = &mut execution => break outcome,
                message = progress.recv(), if progress_open => match message {
                    Some(message) => self.relay_progress(lease, &message),
                    None => progress_open = false,
                },
                _ = heartbeat.tick() => self.renew_lease(lease),
            }
        };

        while let Ok(message) = progress.try_recv() {
            self.relay_progress(lease, &message);
        }
        outcome
    }

    fn relay_progress(&self, lease: &Lease, message: &str) {
        if let Err(e) = self.ctx.store.record_progress(lease.job_id(), message) {
            debug!("Failed to store progress of job {}: {}", lease.job_id(), e);
        }
        self.ctx.tracker.on_progress(lease.job_id(), message);
    }

    fn renew_lease(&self, lease: &Lease) {
        match self.ctx.store.extend_lease(lease, self.ctx.lease_timeout) {
            Ok(true) => {}
            Ok(false) => warn!(
                "{} lost the lease on job {} while its handler was running",
                self.name,
                lease.job_id()
            ),
            Err(e) => warn!(
                "{} failed to extend the lease on job {}: {}",
                self.name,
                lease.job_id(),
                e
            ),
        }
    }

    fn complete(&self, lease: &Lease, result: JsonValue) {
        let job = &lease.job;
        let outcome = JobOutcome::Completed {
            result: result.clone(),
        };
        match self.ctx.store.acknowledge(lease, &outcome) {
            Ok(AckStatus::Acknowledged) => {
                info!("{} completed job {}", self.name, job.id);
                metrics::record_job_finished(job.operation_type, "completed");
                self.ctx.tracker.on_completed(job.operation_id(), &result);
            }
            Ok(AckStatus::AlreadyAcknowledged) => {
                debug!("Completion of job {} was already recorded", job.id);
            }
            Err(e) => error!(
                "{} could not acknowledge completion of job {}: {}",
                self.name, job.id, e
            ),
        }
    }

    fn fail(&self, lease: &Lease, error: QueueError) {
        if let Err(e) = self.ctx.controller.on_failure(lease, &error) {
            error!(
                "{} could not record failure of job {} ({}): {}",
                self.name,
                lease.job_id(),
                error,
                e
            );
        }
    }
}

/// Counts a job as in flight for as long as it is alive.
struct InFlightGuard {
    counter: Arc<AtomicUsize>,
    operation_type: OperationType,
}

impl InFlightGuard {
    fn enter(counter: Arc<AtomicUsize>, operation_type: OperationType) -> Self {
        let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_jobs_in_flight(operation_type, current);
        Self {
            counter,
            operation_type,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let current = self.counter.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_jobs_in_flight(self.operation_type, current);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
