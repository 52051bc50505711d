//! Mirrors job lifecycle transitions into the operation store.
//!
//! Callers never wait for the store: every transition is queued to a single
//! writer task. Writes are keyed by operation id and safe to repeat. A failed
//! write is logged and counted, and never affects the job record.

use crate::job_queue::{now_millis, JobId};
use crate::metrics;
use crate::operation_store::OperationStore;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

enum TrackerCommand {
    Completed {
        operation_id: String,
        result: JsonValue,
        at: i64,
    },
    Failed {
        operation_id: String,
        error: String,
        attempts_made: u32,
        at: i64,
    },
    Flush(oneshot::Sender<()>),
    Close,
}

#[derive(Clone)]
pub struct StatusTracker {
    tx: mpsc::UnboundedSender<TrackerCommand>,
    writer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl StatusTracker {
    /// Start the writer task. Must be called within a tokio runtime.
    pub fn spawn(store: Arc<dyn OperationStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(store, rx));
        Self {
            tx,
            writer: Arc::new(Mutex::new(Some(writer))),
        }
    }

    pub fn on_completed(&self, operation_id: &str, result: &JsonValue) {
        self.send(TrackerCommand::Completed {
            operation_id: operation_id.to_string(),
            result: result.clone(),
            at: now_millis(),
        });
    }

    pub fn on_failed(&self, operation_id: &str, error: &str, attempts_made: u32) {
        self.send(TrackerCommand::Failed {
            operation_id: operation_id.to_string(),
            error: error.to_string(),
            attempts_made,
            at: now_millis(),
        });
    }

    /// Stalls are only logged; the operation is still in flight.
    pub fn on_stalled(&self, job_id: JobId) {
        warn!("Job {} stalled: lease expired before acknowledgment", job_id);
    }

    pub fn on_progress(&self, job_id: JobId, message: &str) {
        debug!("Job {} progress: {}", job_id, message);
    }

    /// Wait until every write submitted before this call has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(TrackerCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Apply pending writes and stop the writer. Later transitions are dropped.
    pub async fn close(&self) {
        let _ = self.tx.send(TrackerCommand::Close);
        if let Some(writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.await {
                error!("Status tracker writer ended abnormally: {}", e);
            }
        }
    }

    fn send(&self, command: TrackerCommand) {
        if self.tx.send(command).is_err() {
            warn!("Status tracker is closed, dropping operation status update");
        }
    }
}

async fn run_writer(
    store: Arc<dyn OperationStore>,
    mut rx: mpsc::UnboundedReceiver<TrackerCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            TrackerCommand::Completed {
                operation_id,
                result,
                at,
            } => {
                let outcome = store.mark_completed(&operation_id, &result, at);
                log_write("completion", &operation_id, outcome);
            }
            TrackerCommand::Failed {
                operation_id,
                error,
                attempts_made,
                at,
            } => {
                let outcome = store.mark_failed(&operation_id, &error, attempts_made, at);
                log_write("failure", &operation_id, outcome);
            }
            TrackerCommand::Flush(done) => {
                let _ = done.send(());
            }
            TrackerCommand::Close => break,
        }
    }
    info!("Status tracker stopped");
}

fn log_write(kind: &str, operation_id: &str, outcome: anyhow::Result<bool>) {
    match outcome {
        Ok(true) => debug!("Recorded {} of operation {}", kind, operation_id),
        Ok(false) => warn!(
            "Operation {} does not exist, {} not recorded",
            operation_id, kind
        ),
        Err(e) => {
            metrics::record_tracker_write_error();
            error!(
                "Failed to record {} of operation {}: {:#}",
                kind, operation_id, e
            );
        }
    }
}
