//! Common test infrastructure
//!
//! Builds a queue over on-disk SQLite databases in a temporary directory,
//! starts a dispatcher with fast timings, and provides instrumented handlers.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{succeeding_handler, TestQueue};
//!
//! #[tokio::test]
//! async fn test_job_completes() {
//!     let registry = HandlerRegistry::new().with(DETECT, API, succeeding_handler(json!(1)));
//!     let mut queue = TestQueue::spawn(registry).await;
//!     let id = queue.enqueue(DETECT, API, "op-1");
//!     queue.wait_for_status(id, JobStatus::Completed).await;
//! }
//! ```

mod constants;
mod handlers;
mod harness;

pub use constants::*;
#[allow(unused_imports)]
pub use handlers::{
    always_failing_handler, concurrency_gauge, flaky_handler, panicking_once_handler,
    recording_handler, sleeping_handler, succeeding_handler, CallLog, ConcurrencyGauge,
    CountingOperationStore, FailingOperationStore,
};
pub use harness::{new_job, TestQueue};
