//! Job producer: create jobs and publish "job may be ready" notifications.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use docqueue_core::{Job, JobRepository, NewJob, NotificationChannel, Result};

/// Creates jobs and announces them on the notification channel, if any.
#[derive(Clone)]
pub struct JobProducer {
    jobs: Arc<dyn JobRepository>,
    channel: Option<Arc<dyn NotificationChannel>>,
}

impl JobProducer {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            channel: None,
        }
    }

    /// Publish notifications on `channel`.
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Create a queued job and announce it.
    ///
    /// A failed publish is logged, not returned; pollers and the sweeper's
    /// republish pass still find the job.
    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job> {
        let job = self.jobs.create(new_job).await?;
        info!(
            subsystem = "jobs",
            component = "producer",
            op = "enqueue",
            job_id = %job.id,
            filename = %job.filename,
            "Job queued"
        );
        self.announce(job.id).await;
        Ok(job)
    }

    /// Publish a notification for a queued job.
    ///
    /// The job is marked notified first and unmarked if the publish fails.
    /// Returns whether a message was published.
    pub async fn announce(&self, job_id: Uuid) -> bool {
        let Some(ref channel) = self.channel else {
            return false;
        };

        match self.jobs.mark_notified(job_id, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    subsystem = "jobs",
                    component = "producer",
                    op = "announce",
                    job_id = %job_id,
                    "Job no longer queued, not publishing"
                );
                return false;
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "producer",
                    op = "mark_notified",
                    job_id = %job_id,
                    error = %e,
                    "Failed to mark job notified"
                );
                return false;
            }
        }

        match channel.publish(job_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "producer",
                    op = "publish",
                    job_id = %job_id,
                    channel = channel.name(),
                    error = %e,
                    "Failed to publish notification"
                );
                if let Err(e) = self.jobs.clear_notified(job_id).await {
                    warn!(
                        subsystem = "jobs",
                        component = "producer",
                        op = "clear_notified",
                        job_id = %job_id,
                        error = %e,
                        "Failed to clear notified flag"
                    );
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqueue_db::{InMemoryJobRepository, InMemoryNotificationChannel};

    #[tokio::test]
    async fn test_enqueue_publishes_and_marks() {
        let repo = InMemoryJobRepository::new();
        let channel = InMemoryNotificationChannel::default();
        let producer =
            JobProducer::new(Arc::new(repo.clone())).with_channel(Arc::new(channel.clone()));

        let job = producer
            .enqueue(NewJob::new("docs/a.txt", "a.txt"))
            .await
            .unwrap();

        assert_eq!(channel.pending_job_ids(), vec![job.id]);
        let stored = repo.get(job.id).await.unwrap().unwrap();
        assert!(stored.notified_at.is_some());
    }

    #[tokio::test]
    async fn test_publish_failure_clears_mark() {
        let repo = InMemoryJobRepository::new();
        let channel = InMemoryNotificationChannel::default();
        channel.set_unavailable(true);
        let producer =
            JobProducer::new(Arc::new(repo.clone())).with_channel(Arc::new(channel.clone()));

        let job = producer
            .enqueue(NewJob::new("docs/a.txt", "a.txt"))
            .await
            .unwrap();

        let stored = repo.get(job.id).await.unwrap().unwrap();
        assert!(stored.notified_at.is_none());
    }

    #[tokio::test]
    async fn test_enqueue_without_channel() {
        let repo = InMemoryJobRepository::new();
        let producer = JobProducer::new(Arc::new(repo.clone()));
        let job = producer
            .enqueue(NewJob::new("docs/a.txt", "a.txt"))
            .await
            .unwrap();
        assert!(!producer.announce(job.id).await);
    }
}
