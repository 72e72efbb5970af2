//! Job repository implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use uuid::Uuid;

use docqueue_core::{
    truncate_error, Error, Job, JobProgress, JobRepository, JobStatus, Lease, NewJob,
    QueueStats, ReleaseFence, ReleaseOutcome, Result,
};

const JOB_COLUMNS: &str = "id, source_path, filename, status::text AS status, progress, attempts, \
     max_attempts, lease_expires_at, lease_token, last_error, notified_at, chunk_count, created_at, \
     updated_at, started_at, completed_at";

/// PostgreSQL implementation of JobRepository.
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// Wakes in-process pollers when a job is created.
    notify: Arc<Notify>,
}

impl PgJobRepository {
    /// Create a new PgJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a new PgJobRepository sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    /// Get the job notification handle for event-driven waking.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: &PgRow) -> Result<Job> {
        let status: String = row.try_get("status")?;
        Ok(Job {
            id: row.try_get("id")?,
            source_path: row.try_get("source_path")?,
            filename: row.try_get("filename")?,
            status: status.parse()?,
            progress: row.try_get("progress")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            lease_token: row.try_get("lease_token")?,
            last_error: row.try_get("last_error")?,
            notified_at: row.try_get("notified_at")?,
            chunk_count: row.try_get("chunk_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn parse_rows(rows: &[PgRow]) -> Result<Vec<Job>> {
        rows.iter().map(Self::parse_job_row).collect()
    }
}

fn lease_deadline(now: DateTime<Utc>, lease_duration: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(lease_duration)
        .map(|d| now + d)
        .map_err(|e| Error::InvalidInput(format!("lease duration out of range: {e}")))
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create(&self, job: NewJob) -> Result<Job> {
        if job.max_attempts < 1 {
            return Err(Error::InvalidInput("max_attempts must be at least 1".into()));
        }

        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO document_job (id, source_path, filename, status, max_attempts, created_at, updated_at)
             VALUES ($1, $2, $3, 'queued'::document_job_status, $4, $5, $5)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(&job.source_path)
        .bind(&job.filename)
        .bind(job.max_attempts)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.notify.notify_waiters();
        Self::parse_job_row(&row)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM document_job WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn get_progress(&self, job_id: Uuid) -> Result<Option<JobProgress>> {
        Ok(self.get(job_id).await?.map(|job| job.progress_view()))
    }

    async fn list_queued(&self, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM document_job
             WHERE status = 'queued'::document_job_status AND attempts < max_attempts
             ORDER BY updated_at ASC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_rows(&rows)
    }

    async fn list_by_status(&self, status: JobStatus, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM document_job
             WHERE status = $1::document_job_status
             ORDER BY updated_at ASC
             LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_rows(&rows)
    }

    async fn acquire(&self, job_id: Uuid, lease_duration: Duration) -> Result<Option<Lease>> {
        let now = Utc::now();
        let expires_at = lease_deadline(now, lease_duration)?;
        let token = Uuid::new_v4();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Conditional update is the serialization point: concurrent acquirers
        // block on the row lock and then fail the status predicate.
        let row = sqlx::query(
            "UPDATE document_job
             SET status = 'processing'::document_job_status,
                 attempts = attempts + 1,
                 lease_expires_at = $2,
                 lease_token = $4,
                 progress = 0,
                 started_at = $3,
                 updated_at = $3
             WHERE id = $1
               AND status = 'queued'::document_job_status
               AND attempts < max_attempts
             RETURNING attempts",
        )
        .bind(job_id)
        .bind(expires_at)
        .bind(now)
        .bind(token)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let lease = match row {
            Some(row) => Some(Lease {
                job_id,
                attempt: row.try_get("attempts")?,
                token,
                expires_at,
            }),
            None => {
                // Queued with a spent budget (admin requeue without reset).
                sqlx::query(
                    "UPDATE document_job
                     SET status = 'failed'::document_job_status,
                         last_error = COALESCE(last_error, 'retry budget exhausted'),
                         notified_at = NULL,
                         completed_at = $2,
                         updated_at = $2
                     WHERE id = $1
                       AND status = 'queued'::document_job_status
                       AND attempts >= max_attempts",
                )
                .bind(job_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
                None
            }
        };

        tx.commit().await.map_err(Error::Database)?;
        Ok(lease)
    }

    async fn renew(&self, lease: &Lease, lease_duration: Duration) -> Result<Option<Lease>> {
        let now = Utc::now();
        let expires_at = lease_deadline(now, lease_duration)?;

        let result = sqlx::query(
            "UPDATE document_job
             SET lease_expires_at = $3
             WHERE id = $1
               AND status = 'processing'::document_job_status
               AND lease_token = $2
               AND lease_expires_at >= $4",
        )
        .bind(lease.job_id)
        .bind(lease.token)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok((result.rows_affected() > 0).then_some(Lease {
            expires_at,
            ..*lease
        }))
    }

    async fn update_progress(&self, lease: &Lease, progress: i32) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE document_job
             SET progress = $3, updated_at = $4
             WHERE id = $1
               AND status = 'processing'::document_job_status
               AND lease_token = $2
               AND progress <= $3",
        )
        .bind(lease.job_id)
        .bind(lease.token)
        .bind(progress.clamp(0, 100))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(
        &self,
        job_id: Uuid,
        outcome: &ReleaseOutcome,
        fence: ReleaseFence,
    ) -> Result<Option<JobStatus>> {
        let now = Utc::now();
        let token = fence.token();
        let expired_before = fence.expired_before();

        let row = match outcome {
            ReleaseOutcome::Success { chunk_count } => sqlx::query(
                "UPDATE document_job
                 SET status = 'completed'::document_job_status,
                     progress = 100,
                     lease_expires_at = NULL,
                     lease_token = NULL,
                     last_error = NULL,
                     notified_at = NULL,
                     chunk_count = $3,
                     completed_at = $4,
                     updated_at = $4
                 WHERE id = $1
                   AND status = 'processing'::document_job_status
                   AND ($2::uuid IS NULL OR lease_token = $2)
                   AND ($5::timestamptz IS NULL OR lease_expires_at < $5)
                 RETURNING status::text AS status",
            )
            .bind(job_id)
            .bind(token)
            .bind(*chunk_count)
            .bind(now)
            .bind(expired_before)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?,
            ReleaseOutcome::Failure { error } => sqlx::query(
                "UPDATE document_job
                 SET status = CASE WHEN attempts < max_attempts
                                   THEN 'queued'::document_job_status
                                   ELSE 'failed'::document_job_status END,
                     progress = CASE WHEN attempts < max_attempts THEN 0 ELSE progress END,
                     completed_at = CASE WHEN attempts < max_attempts THEN NULL ELSE $4 END,
                     lease_expires_at = NULL,
                     lease_token = NULL,
                     last_error = $3,
                     notified_at = NULL,
                     updated_at = $4
                 WHERE id = $1
                   AND status = 'processing'::document_job_status
                   AND ($2::uuid IS NULL OR lease_token = $2)
                   AND ($5::timestamptz IS NULL OR lease_expires_at < $5)
                 RETURNING status::text AS status",
            )
            .bind(job_id)
            .bind(token)
            .bind(truncate_error(error))
            .bind(now)
            .bind(expired_before)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?,
        };

        match row {
            Some(row) => {
                let status: String = row.try_get("status")?;
                Ok(Some(status.parse()?))
            }
            None => Ok(None),
        }
    }

    async fn find_expired_leases(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM document_job
             WHERE status = 'processing'::document_job_status
               AND lease_expires_at < $1
             ORDER BY lease_expires_at ASC
             LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_rows(&rows)
    }

    async fn mark_notified(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE document_job SET notified_at = $2
             WHERE id = $1 AND status = 'queued'::document_job_status",
        )
        .bind(job_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_notified(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE document_job SET notified_at = NULL WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn list_needing_notification(
        &self,
        notified_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM document_job
             WHERE status = 'queued'::document_job_status
               AND attempts < max_attempts
               AND (notified_at IS NULL OR notified_at < $1)
             ORDER BY updated_at ASC
             LIMIT $2"
        ))
        .bind(notified_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_rows(&rows)
    }

    async fn force_requeue(&self, job_id: Uuid, reset_attempts: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE document_job
             SET status = 'queued'::document_job_status,
                 lease_expires_at = NULL,
                 lease_token = NULL,
                 progress = 0,
                 notified_at = NULL,
                 attempts = CASE WHEN $2 THEN 0 ELSE attempts END,
                 last_error = CASE WHEN $2 THEN NULL ELSE last_error END,
                 updated_at = $3
             WHERE id = $1
               AND status IN ('queued'::document_job_status, 'processing'::document_job_status)",
        )
        .bind(job_id)
        .bind(reset_attempts)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() > 0 {
            self.notify.notify_waiters();
        }
        Ok(result.rows_affected() > 0)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'queued'::document_job_status) AS queued,
                COUNT(*) FILTER (WHERE status = 'processing'::document_job_status) AS processing,
                COUNT(*) FILTER (WHERE status = 'completed'::document_job_status) AS completed,
                COUNT(*) FILTER (WHERE status = 'failed'::document_job_status) AS failed,
                COUNT(*) AS total,
                COALESCE(SUM(CASE
                    WHEN status = 'completed'::document_job_status THEN 100
                    WHEN status = 'processing'::document_job_status THEN progress
                    ELSE 0 END), 0)::BIGINT AS progress_sum
             FROM document_job",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            queued: row.try_get("queued")?,
            processing: row.try_get("processing")?,
            completed: row.try_get("completed")?,
            failed: row.try_get("failed")?,
            total: row.try_get("total")?,
            progress_sum: row.try_get("progress_sum")?,
        })
    }
}
