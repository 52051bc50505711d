use tokio::sync::mpsc;
use tracing::trace;

/// One-way, fire-and-forget channel a handler uses to report progress.
///
/// Reports never block the handler: when the buffer is full or the receiving
/// side is gone, the message is dropped.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<mpsc::Sender<String>>,
}

impl ProgressReporter {
    /// Create a reporter together with the receiving end of its buffer.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A reporter that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn report(&self, message: impl Into<String>) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(message)) = tx.try_send(message.into()) {
            trace!("Dropping progress message on backpressure: {}", message);
        }
    }
}
