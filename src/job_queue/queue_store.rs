//! Job queue storage and persistence.
//!
//! Provides the SQLite-backed durable queue. Every state transition is a
//! single conditional update (or an immediate transaction for lease
//! selection), so concurrent workers and processes sharing the database file
//! never observe a job leased twice.

use super::models::*;
use super::now_millis;
use super::schema::QUEUE_VERSIONED_SCHEMAS;
use crate::error::QueueError;
use anyhow::{Context, Result};
use rusqlite::{params, types::Type, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

const STALLED_ERROR: &str = "job stalled: lease expired before acknowledgment";

/// Trait for durable job queue storage.
pub trait JobQueueStore: Send + Sync {
    // === Producer side ===

    /// Persist a new job in `queued` state, immediately eligible for leasing.
    fn enqueue(&self, job: &NewJob, max_attempts: u32) -> Result<JobId, QueueError>;

    /// Get a job by ID.
    fn get_job(&self, id: JobId) -> Result<Option<JobRecord>, QueueError>;

    // === Worker side (atomic) ===

    /// Lease the highest-priority, oldest eligible job of the given type.
    /// Returns None if no job is eligible.
    fn lease_next(
        &self,
        operation_type: OperationType,
        lease_duration: Duration,
    ) -> Result<Option<Lease>, QueueError>;

    /// Push the lease expiry forward. Returns false if the lease was lost.
    fn extend_lease(&self, lease: &Lease, lease_duration: Duration) -> Result<bool, QueueError>;

    /// Record the final outcome of a leased job.
    ///
    /// Repeating the same acknowledgment is a no-op reported as
    /// `AlreadyAcknowledged`. Acknowledging a lost lease fails with
    /// `LeaseExpired`.
    fn acknowledge(&self, lease: &Lease, outcome: &JobOutcome) -> Result<AckStatus, QueueError>;

    /// Return a failed job to the queue, eligible again after `delay`.
    /// Counts the failed execution as an attempt.
    fn requeue(&self, lease: &Lease, delay: Duration, error: &str) -> Result<(), QueueError>;

    /// Store the latest progress message of an active job.
    fn record_progress(&self, id: JobId, message: &str) -> Result<(), QueueError>;

    // === Lease timeout recovery ===

    /// Move every active job whose lease has expired to `stalled`.
    fn mark_stalled(&self) -> Result<Vec<JobRecord>, QueueError>;

    /// Return a stalled job to the queue, counting the lost execution as an
    /// attempt. Returns false if the job is not stalled or has no attempts left.
    fn requeue_stalled(&self, id: JobId) -> Result<bool, QueueError>;

    /// Terminally fail a stalled job.
    fn fail_stalled(&self, id: JobId, error: &str) -> Result<bool, QueueError>;

    // === Retention and inspection ===

    /// Delete the oldest terminal jobs beyond the retention counts.
    /// Returns the number of deleted jobs.
    fn prune_terminal(&self, keep_completed: usize, keep_failed: usize)
        -> Result<usize, QueueError>;

    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobRecord>, QueueError>;

    fn count_by_status(
        &self,
        operation_type: Option<OperationType>,
    ) -> Result<JobCounts, QueueError>;

    /// Release the backend. Every later call fails with `StoreUnavailable`.
    fn close(&self) -> Result<(), QueueError>;
}

/// SQLite-backed job queue store.
pub struct SqliteJobQueueStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteJobQueueStore {
    /// Open an existing queue database or create a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = crate::sqlite_persistence::open_versioned_db(
            db_path.as_ref(),
            QUEUE_VERSIONED_SCHEMAS,
            "queue",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Create an in-memory store.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        QUEUE_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| QueueError::StoreUnavailable("queue store lock poisoned".into()))?;
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(QueueError::StoreUnavailable("queue store is closed".into())),
        }
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        let operation_type: String = row.get("operation_type")?;
        let auth_method: String = row.get("auth_method")?;
        let status: String = row.get("status")?;
        let config: String = row.get("config")?;
        let result: Option<String> = row.get("result")?;

        Ok(JobRecord {
            id: row.get("id")?,
            operation_type: OperationType::from_str(&operation_type)
                .ok_or_else(|| invalid_value("operation_type", &operation_type))?,
            payload: JobPayload {
                operation_id: row.get("operation_id")?,
                user_id: row.get("user_id")?,
                auth_method: AuthMethod::from_str(&auth_method)
                    .ok_or_else(|| invalid_value("auth_method", &auth_method))?,
                config: parse_json(&config)?,
            },
            priority: row.get("priority")?,
            attempts: row.get("attempts")?,
            max_attempts: row.get("max_attempts")?,
            status: JobStatus::from_db_str(&status)
                .ok_or_else(|| invalid_value("status", &status))?,
            created_at: row.get("created_at")?,
            available_at: row.get("available_at")?,
            started_at: row.get("started_at")?,
            lease_expires_at: row.get("lease_expires_at")?,
            finished_at: row.get("finished_at")?,
            progress: row.get("progress")?,
            result: result.as_deref().map(parse_json).transpose()?,
            error: row.get("error")?,
        })
    }

    /// Explain why a conditional update on a leased job matched no row.
    fn lease_state(
        conn: &Connection,
        id: JobId,
    ) -> Result<Option<(String, Option<String>)>, QueueError> {
        let state = conn
            .query_row(
                "SELECT status, lease_token FROM jobs WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(state)
    }
}

fn invalid_value(column: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        Type::Text,
        format!("invalid {} value: {}", column, value).into(),
    )
}

fn parse_json(s: &str) -> rusqlite::Result<JsonValue> {
    serde_json::from_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn to_json(value: &JsonValue) -> Result<String, QueueError> {
    serde_json::to_string(value).map_err(|e| QueueError::InvalidJob(e.to_string()))
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl JobQueueStore for SqliteJobQueueStore {
    fn enqueue(&self, job: &NewJob, max_attempts: u32) -> Result<JobId, QueueError> {
        let config = to_json(&job.payload.config)?;
        let now = now_millis();
        self.with_conn(|conn| {
            conn.execute(
                r#"INSERT INTO jobs (
                    operation_type, operation_id, user_id, auth_method, config,
                    priority, status, attempts, max_attempts, created_at, available_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', 0, ?7, ?8, ?8)"#,
                params![
                    job.operation_type.as_str(),
                    job.payload.operation_id,
                    job.payload.user_id,
                    job.payload.auth_method.as_str(),
                    config,
                    job.priority,
                    max_attempts,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn get_job(&self, id: JobId) -> Result<Option<JobRecord>, QueueError> {
        self.with_conn(|conn| {
            let job = conn
                .query_row(
                    "SELECT * FROM jobs WHERE id = ?1",
                    params![id],
                    Self::row_to_job,
                )
                .optional()?;
            Ok(job)
        })
    }

    fn lease_next(
        &self,
        operation_type: OperationType,
        lease_duration: Duration,
    ) -> Result<Option<Lease>, QueueError> {
        self.with_conn(|conn| {
            let now = now_millis();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let job = tx
                .query_row(
                    r#"SELECT * FROM jobs
                       WHERE operation_type = ?1 AND status = 'queued' AND available_at <= ?2
                       ORDER BY priority ASC, id ASC
                       LIMIT 1"#,
                    params![operation_type.as_str(), now],
                    Self::row_to_job,
                )
                .optional()?;
            let Some(mut job) = job else {
                return Ok(None);
            };

            let token = Uuid::new_v4().to_string();
            let expires_at = now.saturating_add(duration_millis(lease_duration));
            tx.execute(
                r#"UPDATE jobs
                   SET status = 'active', started_at = ?1, lease_token = ?2,
                       lease_expires_at = ?3, progress = NULL
                   WHERE id = ?4 AND status = 'queued'"#,
                params![now, token, expires_at, job.id],
            )?;
            tx.commit()?;

            job.status = JobStatus::Active;
            job.started_at = Some(now);
            job.lease_expires_at = Some(expires_at);
            job.progress = None;
            Ok(Some(Lease {
                job,
                token,
                expires_at,
            }))
        })
    }

    fn extend_lease(&self, lease: &Lease, lease_duration: Duration) -> Result<bool, QueueError> {
        let expires_at = now_millis().saturating_add(duration_millis(lease_duration));
        self.with_conn(|conn| {
            let updated = conn.execute(
                r#"UPDATE jobs SET lease_expires_at = ?1
                   WHERE id = ?2 AND status = 'active' AND lease_token = ?3"#,
                params![expires_at, lease.job_id(), lease.token],
            )?;
            Ok(updated == 1)
        })
    }

    fn acknowledge(&self, lease: &Lease, outcome: &JobOutcome) -> Result<AckStatus, QueueError> {
        let id = lease.job_id();
        let now = now_millis();
        self.with_conn(|conn| {
            let updated = match outcome {
                JobOutcome::Completed { result } => conn.execute(
                    r#"UPDATE jobs
                       SET status = 'completed', result = ?1, error = NULL,
                           finished_at = ?2, lease_expires_at = NULL
                       WHERE id = ?3 AND status = 'active' AND lease_token = ?4"#,
                    params![to_json(result)?, now, id, lease.token],
                )?,
                JobOutcome::Failed { error } => conn.execute(
                    r#"UPDATE jobs
                       SET status = 'failed', error = ?1,
                           attempts = MIN(attempts + 1, max_attempts),
                           finished_at = ?2, lease_expires_at = NULL
                       WHERE id = ?3 AND status = 'active' AND lease_token = ?4"#,
                    params![error, now, id, lease.token],
                )?,
            };
            if updated == 1 {
                return Ok(AckStatus::Acknowledged);
            }

            match Self::lease_state(conn, id)? {
                None => Err(QueueError::JobNotFound(id)),
                Some((status, token))
                    if status == outcome.status().as_db_str()
                        && token.as_deref() == Some(lease.token.as_str()) =>
                {
                    Ok(AckStatus::AlreadyAcknowledged)
                }
                Some(_) => Err(QueueError::LeaseExpired(id)),
            }
        })
    }

    fn requeue(&self, lease: &Lease, delay: Duration, error: &str) -> Result<(), QueueError> {
        let id = lease.job_id();
        let available_at = now_millis().saturating_add(duration_millis(delay));
        self.with_conn(|conn| {
            let updated = conn.execute(
                r#"UPDATE jobs
                   SET status = 'queued', attempts = attempts + 1, available_at = ?1,
                       error = ?2, started_at = NULL, lease_token = NULL,
                       lease_expires_at = NULL, progress = NULL
                   WHERE id = ?3 AND status = 'active' AND lease_token = ?4
                     AND attempts + 1 < max_attempts"#,
                params![available_at, error, id, lease.token],
            )?;
            if updated == 1 {
                return Ok(());
            }

            match Self::lease_state(conn, id)? {
                None => Err(QueueError::JobNotFound(id)),
                Some((status, token))
                    if status == JobStatus::Active.as_db_str()
                        && token.as_deref() == Some(lease.token.as_str()) =>
                {
                    Err(QueueError::InvalidJob(format!(
                        "job {} has no attempts left to requeue",
                        id
                    )))
                }
                Some(_) => Err(QueueError::LeaseExpired(id)),
            }
        })
    }

    fn record_progress(&self, id: JobId, message: &str) -> Result<(), QueueError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET progress = ?1 WHERE id = ?2 AND status = 'active'",
                params![message, id],
            )?;
            Ok(())
        })
    }

    fn mark_stalled(&self) -> Result<Vec<JobRecord>, QueueError> {
        let now = now_millis();
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut stalled = {
                let mut stmt = tx.prepare(
                    r#"SELECT * FROM jobs
                       WHERE status = 'active' AND lease_expires_at <= ?1
                       ORDER BY id ASC"#,
                )?;
                let jobs = stmt
                    .query_map(params![now], Self::row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                jobs
            };
            for job in stalled.iter_mut() {
                tx.execute(
                    r#"UPDATE jobs
                       SET status = 'stalled', lease_token = NULL, lease_expires_at = NULL
                       WHERE id = ?1 AND status = 'active'"#,
                    params![job.id],
                )?;
                job.status = JobStatus::Stalled;
                job.lease_expires_at = None;
            }
            tx.commit()?;
            Ok(stalled)
        })
    }

    fn requeue_stalled(&self, id: JobId) -> Result<bool, QueueError> {
        let now = now_millis();
        self.with_conn(|conn| {
            let updated = conn.execute(
                r#"UPDATE jobs
                   SET status = 'queued', attempts = attempts + 1, available_at = ?1,
                       error = ?2, started_at = NULL, progress = NULL
                   WHERE id = ?3 AND status = 'stalled' AND attempts + 1 < max_attempts"#,
                params![now, STALLED_ERROR, id],
            )?;
            Ok(updated == 1)
        })
    }

    fn fail_stalled(&self, id: JobId, error: &str) -> Result<bool, QueueError> {
        let now = now_millis();
        self.with_conn(|conn| {
            let updated = conn.execute(
                r#"UPDATE jobs
                   SET status = 'failed', attempts = MIN(attempts + 1, max_attempts),
                       error = ?1, finished_at = ?2
                   WHERE id = ?3 AND status = 'stalled'"#,
                params![error, now, id],
            )?;
            Ok(updated == 1)
        })
    }

    fn prune_terminal(
        &self,
        keep_completed: usize,
        keep_failed: usize,
    ) -> Result<usize, QueueError> {
        self.with_conn(|conn| {
            let mut removed = 0;
            for (status, keep) in [
                (JobStatus::Completed, keep_completed),
                (JobStatus::Failed, keep_failed),
            ] {
                removed += conn.execute(
                    r#"DELETE FROM jobs
                       WHERE status = ?1 AND id NOT IN (
                           SELECT id FROM jobs WHERE status = ?1
                           ORDER BY finished_at DESC, id DESC
                           LIMIT ?2
                       )"#,
                    params![status.as_db_str(), sql_limit(keep)],
                )?;
            }
            Ok(removed)
        })
    }

    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobRecord>, QueueError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"SELECT * FROM jobs
                   WHERE (?1 IS NULL OR status = ?1)
                   ORDER BY id ASC
                   LIMIT ?2 OFFSET ?3"#,
            )?;
            let jobs = stmt
                .query_map(
                    params![
                        status.map(|s| s.as_db_str()),
                        sql_limit(limit),
                        sql_limit(offset)
                    ],
                    Self::row_to_job,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(jobs)
        })
    }

    fn count_by_status(
        &self,
        operation_type: Option<OperationType>,
    ) -> Result<JobCounts, QueueError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"SELECT status, COUNT(*) FROM jobs
                   WHERE (?1 IS NULL OR operation_type = ?1)
                   GROUP BY status"#,
            )?;
            let rows = stmt
                .query_map(params![operation_type.map(|t| t.as_str())], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut counts = JobCounts::default();
            for (status, count) in rows {
                if let Some(status) = JobStatus::from_db_str(&status) {
                    counts.set(status, count as usize);
                }
            }
            Ok(counts)
        })
    }

    fn close(&self) -> Result<(), QueueError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| QueueError::StoreUnavailable("queue store lock poisoned".into()))?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| QueueError::from(e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    const LEASE: Duration = Duration::from_secs(30);

    fn new_job(operation_type: OperationType, operation_id: &str) -> NewJob {
        NewJob::new(
            operation_type,
            JobPayload {
                operation_id: operation_id.to_string(),
                user_id: "user-1".to_string(),
                auth_method: AuthMethod::Api,
                config: json!({"limit": 10}),
            },
        )
    }

    fn lease_detect(store: &SqliteJobQueueStore) -> Lease {
        store
            .lease_next(OperationType::DetectUnfollowers, LEASE)
            .unwrap()
            .expect("a job should be eligible")
    }

    #[test]
    fn test_enqueue_and_get_job() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        let id = store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "op1"), 3)
            .unwrap();

        let job = store.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.priority, DEFAULT_PRIORITY);
        assert_eq!(job.payload.operation_id, "op1");
        assert_eq!(job.payload.config, json!({"limit": 10}));
        assert!(store.get_job(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_job_ids_increase() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        let first = store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "a"), 3)
            .unwrap();
        let second = store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "b"), 3)
            .unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_lease_respects_priority_then_fifo() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        let b = store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "b"), 3)
            .unwrap();
        let c = store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "c"), 3)
            .unwrap();
        let a = store
            .enqueue(
                &new_job(OperationType::DetectUnfollowers, "a").with_priority(5),
                3,
            )
            .unwrap();

        assert_eq!(lease_detect(&store).job_id(), a);
        assert_eq!(lease_detect(&store).job_id(), b);
        assert_eq!(lease_detect(&store).job_id(), c);
        assert!(store
            .lease_next(OperationType::DetectUnfollowers, LEASE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_lease_is_scoped_to_operation_type() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        store
            .enqueue(&new_job(OperationType::UnfollowEveryone, "op1"), 3)
            .unwrap();

        assert!(store
            .lease_next(OperationType::DetectUnfollowers, LEASE)
            .unwrap()
            .is_none());
        let lease = store
            .lease_next(OperationType::UnfollowEveryone, LEASE)
            .unwrap()
            .unwrap();
        assert_eq!(lease.job.status, JobStatus::Active);
        assert!(lease.job.started_at.is_some());

        let stored = store.get_job(lease.job_id()).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Active);
        assert_eq!(stored.lease_expires_at, Some(lease.expires_at));
    }

    #[test]
    fn test_acknowledge_completed_is_idempotent() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "op1"), 3)
            .unwrap();
        let lease = lease_detect(&store);

        let outcome = JobOutcome::Completed {
            result: json!({"unfollowers": 4}),
        };
        assert_eq!(
            store.acknowledge(&lease, &outcome).unwrap(),
            AckStatus::Acknowledged
        );
        assert_eq!(
            store.acknowledge(&lease, &outcome).unwrap(),
            AckStatus::AlreadyAcknowledged
        );

        let job = store.get_job(lease.job_id()).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"unfollowers": 4})));
        assert_eq!(job.attempts, 0);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_acknowledge_failed_counts_attempt() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "op1"), 3)
            .unwrap();
        let lease = lease_detect(&store);

        let outcome = JobOutcome::Failed {
            error: "boom".into(),
        };
        store.acknowledge(&lease, &outcome).unwrap();
        assert_eq!(
            store.acknowledge(&lease, &outcome).unwrap(),
            AckStatus::AlreadyAcknowledged
        );

        let job = store.get_job(lease.job_id()).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_acknowledge_with_conflicting_outcome_fails() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "op1"), 3)
            .unwrap();
        let lease = lease_detect(&store);

        store
            .acknowledge(&lease, &JobOutcome::Completed { result: json!(null) })
            .unwrap();
        let err = store
            .acknowledge(
                &lease,
                &JobOutcome::Failed {
                    error: "late".into(),
                },
            )
            .unwrap_err();
        assert_eq!(err, QueueError::LeaseExpired(lease.job_id()));
    }

    #[test]
    fn test_acknowledge_after_stall_reports_lease_expired() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "op1"), 3)
            .unwrap();
        let lease = store
            .lease_next(OperationType::DetectUnfollowers, Duration::ZERO)
            .unwrap()
            .unwrap();

        let stalled = store.mark_stalled().unwrap();
        assert_eq!(stalled.len(), 1);

        let err = store
            .acknowledge(&lease, &JobOutcome::Completed { result: json!(1) })
            .unwrap_err();
        assert_eq!(err, QueueError::LeaseExpired(lease.job_id()));
        assert!(!store.extend_lease(&lease, LEASE).unwrap());
    }

    #[test]
    fn test_extend_lease_keeps_job_from_stalling() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "op1"), 3)
            .unwrap();
        let lease = store
            .lease_next(OperationType::DetectUnfollowers, Duration::ZERO)
            .unwrap()
            .unwrap();

        assert!(store.extend_lease(&lease, LEASE).unwrap());
        assert!(store.mark_stalled().unwrap().is_empty());
    }

    #[test]
    fn test_requeue_delays_visibility() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "op1"), 3)
            .unwrap();
        let lease = lease_detect(&store);

        store
            .requeue(&lease, Duration::from_secs(60), "transient")
            .unwrap();

        let job = store.get_job(lease.job_id()).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error.as_deref(), Some("transient"));
        assert!(job.available_at >= now_millis() + 59_000);
        assert!(store
            .lease_next(OperationType::DetectUnfollowers, LEASE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_requeue_without_delay_is_leasable_again() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "op1"), 3)
            .unwrap();
        let first = lease_detect(&store);
        store.requeue(&first, Duration::ZERO, "transient").unwrap();

        let second = lease_detect(&store);
        assert_eq!(second.job_id(), first.job_id());
        assert_eq!(second.job.attempts, 1);
        assert_ne!(second.token, first.token);

        // The old lease is no longer valid
        let err = store
            .acknowledge(&first, &JobOutcome::Completed { result: json!(1) })
            .unwrap_err();
        assert_eq!(err, QueueError::LeaseExpired(first.job_id()));
    }

    #[test]
    fn test_requeue_refuses_to_exceed_max_attempts() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "op1"), 1)
            .unwrap();
        let lease = lease_detect(&store);

        let err = store.requeue(&lease, Duration::ZERO, "boom").unwrap_err();
        assert!(matches!(err, QueueError::InvalidJob(_)));
        let job = store.get_job(lease.job_id()).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn test_record_progress() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "op1"), 3)
            .unwrap();
        let lease = lease_detect(&store);

        store.record_progress(lease.job_id(), "scanned 100").unwrap();
        let job = store.get_job(lease.job_id()).unwrap().unwrap();
        assert_eq!(job.progress.as_deref(), Some("scanned 100"));
    }

    #[test]
    fn test_stalled_job_is_requeued_with_attempt() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        let id = store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "op1"), 3)
            .unwrap();
        store
            .lease_next(OperationType::DetectUnfollowers, Duration::ZERO)
            .unwrap()
            .unwrap();

        let stalled = store.mark_stalled().unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].status, JobStatus::Stalled);
        assert_eq!(
            store.get_job(id).unwrap().unwrap().status,
            JobStatus::Stalled
        );

        assert!(store.requeue_stalled(id).unwrap());
        let job = store.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 1);

        // Already queued, nothing to do
        assert!(!store.requeue_stalled(id).unwrap());
    }

    #[test]
    fn test_stalled_job_without_attempts_left_is_failed() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        let id = store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "op1"), 1)
            .unwrap();
        store
            .lease_next(OperationType::DetectUnfollowers, Duration::ZERO)
            .unwrap()
            .unwrap();
        store.mark_stalled().unwrap();

        assert!(!store.requeue_stalled(id).unwrap());
        assert!(store.fail_stalled(id, "lease expired").unwrap());

        let job = store.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error.as_deref(), Some("lease expired"));
    }

    #[test]
    fn test_prune_terminal_keeps_newest() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        let mut completed = Vec::new();
        for i in 0..5 {
            store
                .enqueue(&new_job(OperationType::DetectUnfollowers, &format!("c{}", i)), 3)
                .unwrap();
            let lease = lease_detect(&store);
            store
                .acknowledge(&lease, &JobOutcome::Completed { result: json!(i) })
                .unwrap();
            completed.push(lease.job_id());
        }
        for i in 0..3 {
            store
                .enqueue(&new_job(OperationType::DetectUnfollowers, &format!("f{}", i)), 3)
                .unwrap();
            let lease = lease_detect(&store);
            store
                .acknowledge(
                    &lease,
                    &JobOutcome::Failed {
                        error: "boom".into(),
                    },
                )
                .unwrap();
        }
        let queued = store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "q"), 3)
            .unwrap();

        let removed = store.prune_terminal(2, 1).unwrap();
        assert_eq!(removed, 5);

        let counts = store.count_by_status(None).unwrap();
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.queued, 1);
        assert!(store.get_job(queued).unwrap().is_some());
        assert!(store.get_job(completed[4]).unwrap().is_some());
        assert!(store.get_job(completed[0]).unwrap().is_none());
    }

    #[test]
    fn test_count_by_status_filters_type() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "a"), 3)
            .unwrap();
        store
            .enqueue(&new_job(OperationType::UnfollowEveryone, "b"), 3)
            .unwrap();
        lease_detect(&store);

        let detect = store
            .count_by_status(Some(OperationType::DetectUnfollowers))
            .unwrap();
        assert_eq!(detect.active, 1);
        assert_eq!(detect.queued, 0);

        let all = store.count_by_status(None).unwrap();
        assert_eq!(all.active, 1);
        assert_eq!(all.queued, 1);
    }

    #[test]
    fn test_list_jobs_by_status() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        for id in ["a", "b", "c"] {
            store
                .enqueue(&new_job(OperationType::DetectUnfollowers, id), 3)
                .unwrap();
        }
        lease_detect(&store);

        let queued = store.list_jobs(Some(JobStatus::Queued), 10, 0).unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].payload.operation_id, "b");

        let page = store.list_jobs(None, 1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].payload.operation_id, "b");
    }

    #[test]
    fn test_closed_store_is_unavailable() {
        let store = SqliteJobQueueStore::in_memory().unwrap();
        store.close().unwrap();

        let err = store
            .enqueue(&new_job(OperationType::DetectUnfollowers, "op1"), 3)
            .unwrap_err();
        assert!(matches!(err, QueueError::StoreUnavailable(_)));
        // Closing twice is harmless
        store.close().unwrap();
    }

    #[test]
    fn test_jobs_survive_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("queue.db");

        let id = {
            let store = SqliteJobQueueStore::new(&db_path).unwrap();
            let id = store
                .enqueue(&new_job(OperationType::UnfollowNonFollowers, "op1"), 3)
                .unwrap();
            store.close().unwrap();
            id
        };

        let store = SqliteJobQueueStore::new(&db_path).unwrap();
        let job = store.get_job(id).unwrap().unwrap();
        assert_eq!(job.operation_type, OperationType::UnfollowNonFollowers);
        assert_eq!(job.status, JobStatus::Queued);
    }
}
