//! Periodic lease-timeout recovery and retention.

use super::retry_controller::{FailureDisposition, RetryController};
use crate::config::QueueSettings;
use crate::error::QueueError;
use crate::job_queue::{JobQueueStore, JobStatus};
use crate::metrics;
use crate::status_tracker::StatusTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Stalled jobs recycled per pass.
const STALLED_BATCH: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Active jobs whose lease had expired.
    pub stalled: usize,
    /// Stalled jobs returned to the queue.
    pub recycled: usize,
    /// Stalled jobs that ran out of attempts.
    pub failed: usize,
    /// Terminal jobs deleted by retention.
    pub pruned: usize,
    /// Stalled jobs that could not be handled in this pass.
    pub errors: usize,
}

pub struct QueueMaintenance {
    store: Arc<dyn JobQueueStore>,
    controller: Arc<RetryController>,
    tracker: StatusTracker,
    interval: Duration,
    keep_completed: usize,
    keep_failed: usize,
}

impl QueueMaintenance {
    pub fn new(
        store: Arc<dyn JobQueueStore>,
        controller: Arc<RetryController>,
        tracker: StatusTracker,
        settings: &QueueSettings,
    ) -> Self {
        Self {
            store,
            controller,
            tracker,
            interval: settings.stall_check_interval,
            keep_completed: settings.keep_completed,
            keep_failed: settings.keep_failed,
        }
    }

    /// One recovery and retention pass.
    pub fn run_once(&self) -> Result<MaintenanceReport, QueueError> {
        let mut report = MaintenanceReport::default();

        let newly_stalled = self.store.mark_stalled()?;
        report.stalled = newly_stalled.len();
        for job in &newly_stalled {
            metrics::record_job_finished(job.operation_type, "stalled");
            self.tracker.on_stalled(job.id);
        }

        // Also picks up jobs left stalled by an interrupted earlier pass
        let stalled = self
            .store
            .list_jobs(Some(JobStatus::Stalled), STALLED_BATCH, 0)?;
        for job in &stalled {
            match self.controller.on_stalled(job) {
                Ok(Some(FailureDisposition::Retrying { .. })) => report.recycled += 1,
                Ok(Some(FailureDisposition::Failed { .. })) => report.failed += 1,
                Ok(None) => {}
                Err(e) => {
                    // Left stalled, retried on the next pass
                    error!("Failed to recover stalled job {}: {}", job.id, e);
                    report.errors += 1;
                }
            }
        }

        report.pruned = self
            .store
            .prune_terminal(self.keep_completed, self.keep_failed)?;
        Ok(report)
    }

    /// Run passes until shutdown. The first pass runs immediately, so jobs
    /// abandoned by a previous process are recovered at startup.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => match self.run_once() {
                    Ok(report) if report.stalled + report.failed + report.recycled + report.errors > 0 => info!(
                        "Queue maintenance: {} stalled, {} recycled, {} failed, {} pruned, {} errors",
                        report.stalled, report.recycled, report.failed, report.pruned, report.errors
                    ),
                    Ok(report) => {
                        if report.pruned > 0 {
                            debug!("Queue maintenance pruned {} terminal job(s)", report.pruned);
                        }
                    }
                    Err(e) => error!("Queue maintenance failed: {}", e),
                },
            }
        }
        debug!("Queue maintenance stopped");
    }
}
