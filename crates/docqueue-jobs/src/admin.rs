//! Operator operations: progress lookup, forced requeue, queue summary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use docqueue_core::{
    defaults, Error, Job, JobProgress, JobRepository, JobStatus, QueueStats, Result,
};

use crate::producer::JobProducer;

/// Maximum processing jobs inspected for the stuck list.
const STUCK_SCAN_LIMIT: i64 = 1000;

/// A processing job that started longer ago than the stuck threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StuckJob {
    pub job_id: Uuid,
    pub filename: String,
    pub attempts: i32,
    pub progress: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl From<&Job> for StuckJob {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            filename: job.filename.clone(),
            attempts: job.attempts,
            progress: job.progress,
            started_at: job.started_at,
            lease_expires_at: job.lease_expires_at,
        }
    }
}

/// Counts per status plus the stuck processing jobs.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSummary {
    pub stats: QueueStats,
    pub overall_progress: i64,
    pub stuck: Vec<StuckJob>,
}

/// Administrative access to the job store.
#[derive(Clone)]
pub struct AdminService {
    jobs: Arc<dyn JobRepository>,
    producer: JobProducer,
}

impl AdminService {
    pub fn new(jobs: Arc<dyn JobRepository>, producer: JobProducer) -> Self {
        Self { jobs, producer }
    }

    /// Progress snapshot for a job.
    pub async fn progress(&self, job_id: Uuid) -> Result<JobProgress> {
        self.jobs
            .get_progress(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))
    }

    /// Force a non-terminal job back to the queue.
    ///
    /// Bypasses the lease. A worker still holding the old lease loses it at
    /// its next renewal or release. With `reset_attempts` the job gets a
    /// fresh attempt budget.
    pub async fn force_requeue(&self, job_id: Uuid, reset_attempts: bool) -> Result<Job> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;
        if job.status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "job {job_id} is {} and cannot be requeued",
                job.status
            )));
        }

        if !self.jobs.force_requeue(job_id, reset_attempts).await? {
            return Err(Error::InvalidInput(format!(
                "job {job_id} finished before it could be requeued"
            )));
        }

        info!(
            subsystem = "jobs",
            component = "admin",
            op = "force_requeue",
            job_id = %job_id,
            previous_status = %job.status,
            reset_attempts,
            "Job force-requeued"
        );

        self.producer.announce(job_id).await;
        self.jobs
            .get(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))
    }

    /// Queue counts and processing jobs started before `now` minus the
    /// stuck threshold.
    pub async fn status_summary(&self, now: DateTime<Utc>) -> Result<QueueSummary> {
        let stats = self.jobs.queue_stats().await?;
        let threshold = now - chrono::Duration::seconds(defaults::STUCK_AFTER_SECS);

        let stuck = self
            .jobs
            .list_by_status(JobStatus::Processing, STUCK_SCAN_LIMIT)
            .await?
            .iter()
            .filter(|job| job.started_at.is_some_and(|started| started < threshold))
            .map(StuckJob::from)
            .collect();

        Ok(QueueSummary {
            overall_progress: stats.overall_progress(),
            stats,
            stuck,
        })
    }

    pub fn producer(&self) -> &JobProducer {
        &self.producer
    }
}
