//! Graceful shutdown: stop leasing, drain in-flight jobs within a grace
//! period, flush the status tracker and release the queue backend.

use super::Dispatcher;
use crate::job_queue::JobQueueStore;
use crate::status_tracker::StatusTracker;
use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every worker stopped within the grace period.
    pub drained: bool,
    /// Workers aborted with a job still running. Their jobs stay active and
    /// are recovered once the lease expires.
    pub abandoned_workers: usize,
    pub elapsed: Duration,
}

pub struct ShutdownCoordinator {
    grace_period: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    pub async fn shutdown(
        &self,
        dispatcher: Dispatcher,
        tracker: &StatusTracker,
        store: &dyn JobQueueStore,
    ) -> ShutdownReport {
        let started = Instant::now();
        let in_flight = dispatcher.total_in_flight();
        info!("Shutting down, no new jobs will be leased");
        if in_flight > 0 {
            info!(
                "Waiting up to {:?} for {} job(s) in flight",
                self.grace_period, in_flight
            );
        }

        let deadline = tokio::time::Instant::now() + self.grace_period;
        let (workers, mut maintenance) = dispatcher.stop();

        let mut abandoned_workers = 0;
        for mut worker in workers {
            if tokio::time::timeout_at(deadline, &mut worker).await.is_err() {
                worker.abort();
                abandoned_workers += 1;
            }
        }
        if tokio::time::timeout_at(deadline, &mut maintenance)
            .await
            .is_err()
        {
            maintenance.abort();
        }

        if abandoned_workers > 0 {
            warn!(
                "Grace period elapsed, abandoned {} job(s); they will be retried after their lease expires",
                abandoned_workers
            );
        }

        tracker.close().await;
        if let Err(e) = store.close() {
            error!("Failed to close queue store: {}", e);
        }

        let elapsed = started.elapsed();
        info!("Shutdown complete in {:?}", elapsed);
        ShutdownReport {
            drained: abandoned_workers == 0,
            abandoned_workers,
            elapsed,
        }
    }
}

/// Wait for SIGINT or, on unix, SIGTERM.
pub async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received");
    Ok(())
}
