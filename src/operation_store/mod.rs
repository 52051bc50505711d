//! Persistence of operation records, the business-level view of a job.
//!
//! Records are created by producers. The status tracker only updates them.

mod models;
mod schema;
mod sqlite_operation_store;

pub use models::*;
pub use sqlite_operation_store::SqliteOperationStore;

use anyhow::Result;
use serde_json::Value as JsonValue;

pub trait OperationStore: Send + Sync {
    /// Create a pending operation. Returns false if it already exists.
    fn create_operation(&self, operation: &NewOperation) -> Result<bool>;

    fn get_operation(&self, id: &str) -> Result<Option<OperationRecord>>;

    /// Record a successful outcome. Returns false if the operation does not exist.
    fn mark_completed(&self, id: &str, result: &JsonValue, completed_at: i64) -> Result<bool>;

    /// Record a terminal failure. Returns false if the operation does not exist.
    fn mark_failed(&self, id: &str, error: &str, retry_count: u32, failed_at: i64)
        -> Result<bool>;
}
