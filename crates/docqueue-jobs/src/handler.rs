//! Job handler trait and per-attempt context.

use async_trait::async_trait;
use futures::future::BoxFuture;
use uuid::Uuid;

use docqueue_core::{Job, Lease, ReleaseOutcome, Stage};

/// Progress callback type for job handlers.
///
/// Invoked when the handler enters a stage. The returned future resolves once
/// the progress write has been attempted.
pub type ProgressCallback = Box<dyn Fn(Stage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// Snapshot of the job taken when the attempt started.
    pub job: Job,
    /// Lease held for this attempt.
    pub lease: Lease,
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(job: Job, lease: Lease) -> Self {
        Self {
            job,
            lease,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Stage) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report that the handler entered `stage`.
    pub async fn report_progress(&self, stage: Stage) {
        if let Some(ref callback) = self.progress_callback {
            callback(stage).await;
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    /// Attempt number this context belongs to (1-based).
    pub fn attempt(&self) -> i32 {
        self.lease.attempt
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Every stage finished and `chunk_count` chunks were indexed.
    Success { chunk_count: i32 },
    /// The attempt failed with an error message.
    Failed(String),
}

impl JobResult {
    /// Convert into the release outcome recorded on the job.
    pub fn into_outcome(self) -> ReleaseOutcome {
        match self {
            JobResult::Success { chunk_count } => ReleaseOutcome::Success { chunk_count },
            JobResult::Failed(error) => ReleaseOutcome::failure(error),
        }
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Handler name for logs.
    fn name(&self) -> &str;

    /// Execute one attempt. Errors are reported through `JobResult::Failed`.
    async fn execute(&self, ctx: &JobContext) -> JobResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docqueue_core::{JobStatus, NewJob};
    use std::sync::{Arc, Mutex};

    fn sample_job() -> Job {
        let new_job = NewJob::new("a/b.txt", "b.txt");
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            source_path: new_job.source_path,
            filename: new_job.filename,
            status: JobStatus::Processing,
            progress: 0,
            attempts: 1,
            max_attempts: new_job.max_attempts,
            lease_expires_at: Some(now),
            lease_token: None,
            last_error: None,
            notified_at: None,
            chunk_count: None,
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_progress_callback_receives_stages() {
        let job = sample_job();
        let lease = Lease {
            job_id: job.id,
            attempt: 1,
            token: Uuid::new_v4(),
            expires_at: Utc::now(),
        };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = JobContext::new(job, lease).with_progress_callback(move |stage| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push(stage.progress());
            })
        });

        ctx.report_progress(Stage::Downloading).await;
        ctx.report_progress(Stage::Extracting).await;

        assert_eq!(*seen.lock().unwrap(), vec![10, 25]);
        assert_eq!(ctx.attempt(), 1);
    }

    #[tokio::test]
    async fn test_report_without_callback_is_noop() {
        let job = sample_job();
        let lease = Lease {
            job_id: job.id,
            attempt: 1,
            token: Uuid::new_v4(),
            expires_at: Utc::now(),
        };
        let ctx = JobContext::new(job, lease);
        ctx.report_progress(Stage::Indexing).await;
    }

    #[test]
    fn test_result_into_outcome() {
        assert_eq!(
            JobResult::Success { chunk_count: 3 }.into_outcome(),
            ReleaseOutcome::Success { chunk_count: 3 }
        );
        assert!(!JobResult::Failed("boom".into()).into_outcome().is_success());
    }
}
