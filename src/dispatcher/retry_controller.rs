use super::retry_policy::RetryPolicy;
use crate::error::QueueError;
use crate::job_queue::{AckStatus, JobOutcome, JobQueueStore, JobRecord, Lease};
use crate::metrics;
use crate::status_tracker::StatusTracker;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What happened to a job after a failed or lost execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Back in the queue, eligible again after `delay`.
    Retrying { attempts_made: u32, delay: Duration },
    /// Terminally failed and reported to the status tracker.
    Failed { attempts_made: u32 },
}

/// Decides between retry with backoff and terminal failure.
pub struct RetryController {
    store: Arc<dyn JobQueueStore>,
    policy: RetryPolicy,
    tracker: StatusTracker,
}

impl RetryController {
    pub fn new(store: Arc<dyn JobQueueStore>, policy: RetryPolicy, tracker: StatusTracker) -> Self {
        Self {
            store,
            policy,
            tracker,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Handle a failed execution of a leased job.
    pub fn on_failure(
        &self,
        lease: &Lease,
        error: &QueueError,
    ) -> Result<FailureDisposition, QueueError> {
        let job = &lease.job;
        let attempts_made = job.attempts + 1;
        let message = error.to_string();

        if self
            .policy
            .should_retry(error, attempts_made, job.max_attempts)
        {
            let delay = self.policy.backoff_delay(attempts_made);
            self.store.requeue(lease, delay, &message)?;
            warn!(
                "Job {} ({}) failed on attempt {}/{}, retrying in {:?}: {}",
                job.id, job.operation_type, attempts_made, job.max_attempts, delay, message
            );
            metrics::record_job_finished(job.operation_type, "retried");
            return Ok(FailureDisposition::Retrying {
                attempts_made,
                delay,
            });
        }

        let outcome = JobOutcome::Failed {
            error: message.clone(),
        };
        match self.store.acknowledge(lease, &outcome)? {
            AckStatus::Acknowledged => {
                error!(
                    "Job {} ({}) failed permanently after {} attempt(s): {}",
                    job.id, job.operation_type, attempts_made, message
                );
                metrics::record_job_finished(job.operation_type, "failed");
                self.tracker
                    .on_failed(job.operation_id(), &message, attempts_made);
            }
            AckStatus::AlreadyAcknowledged => {
                debug!("Failure of job {} was already recorded", job.id);
            }
        }
        Ok(FailureDisposition::Failed { attempts_made })
    }

    /// Handle a job whose lease expired without acknowledgment.
    ///
    /// Returns None if the job was no longer stalled.
    pub fn on_stalled(&self, job: &JobRecord) -> Result<Option<FailureDisposition>, QueueError> {
        let attempts_made = job.attempts + 1;
        let error = QueueError::LeaseExpired(job.id);

        if self
            .policy
            .should_retry(&error, attempts_made, job.max_attempts)
            && self.store.requeue_stalled(job.id)?
        {
            info!(
                "Stalled job {} ({}) returned to the queue after attempt {}/{}",
                job.id, job.operation_type, attempts_made, job.max_attempts
            );
            metrics::record_job_finished(job.operation_type, "retried");
            return Ok(Some(FailureDisposition::Retrying {
                attempts_made,
                delay: Duration::ZERO,
            }));
        }

        let message = error.to_string();
        if self.store.fail_stalled(job.id, &message)? {
            error!(
                "Stalled job {} ({}) failed permanently after {} attempt(s)",
                job.id, job.operation_type, attempts_made
            );
            metrics::record_job_finished(job.operation_type, "failed");
            self.tracker
                .on_failed(job.operation_id(), &message, attempts_made);
            return Ok(Some(FailureDisposition::Failed { attempts_made }));
        }
        Ok(None)
    }
}
