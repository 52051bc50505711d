use super::models::*;
use super::schema::OPERATIONS_VERSIONED_SCHEMAS;
use super::OperationStore;
use crate::job_queue::now_millis;
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Clone)]
pub struct SqliteOperationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteOperationStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = crate::sqlite_persistence::open_versioned_db(
            db_path.as_ref(),
            OPERATIONS_VERSIONED_SCHEMAS,
            "operations",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        OPERATIONS_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("operation store lock poisoned"))
    }

    fn row_to_operation(row: &rusqlite::Row) -> rusqlite::Result<OperationRecord> {
        let status: String = row.get("status")?;
        let result: Option<String> = row.get("result")?;
        Ok(OperationRecord {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            operation_type: row.get("operation_type")?,
            status: OperationStatus::from_str(&status).unwrap_or(OperationStatus::Pending),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
            // Results written by other tools may not be JSON
            result: result.map(|r| serde_json::from_str(&r).unwrap_or(JsonValue::String(r))),
            error: row.get("error")?,
            retry_count: row.get("retry_count")?,
        })
    }
}

impl OperationStore for SqliteOperationStore {
    fn create_operation(&self, operation: &NewOperation) -> Result<bool> {
        let now = now_millis();
        let conn = self.lock()?;
        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO operations
               (id, user_id, operation_type, status, created_at, updated_at, retry_count)
               VALUES (?1, ?2, ?3, 'pending', ?4, ?4, 0)"#,
            params![operation.id, operation.user_id, operation.operation_type, now],
        )?;
        Ok(inserted == 1)
    }

    fn get_operation(&self, id: &str) -> Result<Option<OperationRecord>> {
        let conn = self.lock()?;
        let operation = conn
            .query_row(
                "SELECT * FROM operations WHERE id = ?1",
                params![id],
                Self::row_to_operation,
            )
            .optional()?;
        Ok(operation)
    }

    fn mark_completed(&self, id: &str, result: &JsonValue, completed_at: i64) -> Result<bool> {
        let result = serde_json::to_string(result)?;
        let conn = self.lock()?;
        let updated = conn.execute(
            r#"UPDATE operations
               SET status = 'completed', result = ?1, error = NULL,
                   completed_at = ?2, updated_at = ?2
               WHERE id = ?3"#,
            params![result, completed_at, id],
        )?;
        Ok(updated == 1)
    }

    fn mark_failed(
        &self,
        id: &str,
        error: &str,
        retry_count: u32,
        failed_at: i64,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            r#"UPDATE operations
               SET status = 'failed', error = ?1, retry_count = ?2, updated_at = ?3
               WHERE id = ?4"#,
            params![error, retry_count, failed_at, id],
        )?;
        Ok(updated == 1)
    }
}
