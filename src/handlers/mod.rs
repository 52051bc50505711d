//! Operation handlers and their registry.
//!
//! A handler performs the actual work of one operation type for one
//! execution strategy. The dispatcher only knows the `Handler` trait; the
//! registry maps `(OperationType, AuthMethod)` to an implementation.

mod command_handler;
mod progress;
mod registry;

pub use command_handler::{CommandHandler, CommandHandlerSettings};
pub use progress::ProgressReporter;
pub use registry::HandlerRegistry;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("process exited with status {code:?}: {stderr}")]
    ProcessExit { code: Option<i32>, stderr: String },

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    /// Run the operation for `user_id`.
    ///
    /// `config` is the opaque handler configuration carried by the job. The
    /// returned value is stored as the job result and forwarded to the
    /// operation record.
    async fn execute(
        &self,
        user_id: &str,
        config: &JsonValue,
        progress: ProgressReporter,
    ) -> Result<JsonValue, HandlerError>;
}

/// Adapts an async closure into a `Handler`.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(String, JsonValue, ProgressReporter) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue, HandlerError>> + Send + 'static,
{
    async fn execute(
        &self,
        user_id: &str,
        config: &JsonValue,
        progress: ProgressReporter,
    ) -> Result<JsonValue, HandlerError> {
        (self.f)(user_id.to_string(), config.clone(), progress).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(String, JsonValue, ProgressReporter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonValue, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}
