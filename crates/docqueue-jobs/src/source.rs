//! Job sources: where the worker learns which jobs may be ready.
//!
//! [`PollingSource`] queries the job store for queued jobs.
//! [`NotificationSource`] receives push notifications and falls back to
//! polling whenever the channel cannot be read.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use docqueue_core::{Delivery, JobRepository, NotificationChannel};

/// A reference to a job that may be ready for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRef {
    /// Found by querying the job store.
    Polled { job_id: Uuid },
    /// Delivered by the notification channel.
    Notified { delivery: Delivery },
}

impl JobRef {
    pub fn job_id(&self) -> Uuid {
        match self {
            JobRef::Polled { job_id } => *job_id,
            JobRef::Notified { delivery } => delivery.job_id,
        }
    }

    pub fn delivery(&self) -> Option<&Delivery> {
        match self {
            JobRef::Polled { .. } => None,
            JobRef::Notified { delivery } => Some(delivery),
        }
    }
}

/// What to do with a delivery once its attempt concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the message.
    Ack,
    /// Make the message visible again for redelivery.
    Abandon,
    /// Leave it alone; the visibility timeout redelivers it.
    Leave,
}

/// Delivery strategy for the worker loop.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Next batch of at most `max` job references.
    ///
    /// May wait before returning. An empty batch means nothing was found
    /// within this source's wait.
    async fn next_batch(&self, max: usize) -> Vec<JobRef>;

    /// Settle a job reference after its attempt.
    async fn settle(&self, job: &JobRef, disposition: Disposition);

    /// Source name for logs.
    fn name(&self) -> &'static str;
}

/// Pull-based source over the job store.
pub struct PollingSource {
    jobs: Arc<dyn JobRepository>,
    poll_interval: Duration,
    wake: Option<Arc<Notify>>,
}

impl PollingSource {
    pub fn new(jobs: Arc<dyn JobRepository>, poll_interval: Duration) -> Self {
        Self {
            jobs,
            poll_interval,
            wake: None,
        }
    }

    /// Wake early when `notify` fires, e.g. on job creation in this process.
    pub fn with_wake(mut self, notify: Arc<Notify>) -> Self {
        self.wake = Some(notify);
        self
    }

    /// Query once without waiting.
    pub async fn poll_once(&self, max: usize) -> Vec<JobRef> {
        let limit = i64::try_from(max).unwrap_or(i64::MAX);
        match self.jobs.list_queued(limit).await {
            Ok(jobs) => jobs
                .into_iter()
                .map(|job| JobRef::Polled { job_id: job.id })
                .collect(),
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "source",
                    op = "poll",
                    error = %e,
                    "Failed to query queued jobs"
                );
                Vec::new()
            }
        }
    }

    async fn wait(&self, delay: Duration) {
        match self.wake {
            Some(ref notify) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = notify.notified() => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

#[async_trait]
impl JobSource for PollingSource {
    async fn next_batch(&self, max: usize) -> Vec<JobRef> {
        let batch = self.poll_once(max).await;
        if batch.is_empty() {
            self.wait(self.poll_interval).await;
        }
        batch
    }

    async fn settle(&self, _job: &JobRef, _disposition: Disposition) {}

    fn name(&self) -> &'static str {
        "poll"
    }
}

/// Push-based source with a polling fallback.
pub struct NotificationSource {
    channel: Arc<dyn NotificationChannel>,
    jobs: Arc<dyn JobRepository>,
    fallback: PollingSource,
    max_messages: usize,
    max_wait: Duration,
    idle_delay: Duration,
}

impl NotificationSource {
    /// `fallback` is used whenever a receive fails.
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        jobs: Arc<dyn JobRepository>,
        fallback: PollingSource,
    ) -> Self {
        Self {
            channel,
            jobs,
            fallback,
            max_messages: docqueue_core::defaults::NOTIFY_MAX_MESSAGES,
            max_wait: Duration::from_secs(docqueue_core::defaults::NOTIFY_MAX_WAIT_SECS),
            idle_delay: Duration::from_millis(docqueue_core::defaults::WORKER_NOTIFY_IDLE_MS),
        }
    }

    /// Messages per receive and how long a receive may block.
    pub fn with_receive_limits(mut self, max_messages: usize, max_wait: Duration) -> Self {
        self.max_messages = max_messages.max(1);
        self.max_wait = max_wait;
        self
    }

    /// Pause after an empty receive.
    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    pub fn channel(&self) -> &Arc<dyn NotificationChannel> {
        &self.channel
    }
}

#[async_trait]
impl JobSource for NotificationSource {
    async fn next_batch(&self, max: usize) -> Vec<JobRef> {
        match self
            .channel
            .receive(max.min(self.max_messages), self.max_wait)
            .await
        {
            Ok(deliveries) if !deliveries.is_empty() => {
                debug!(
                    subsystem = "jobs",
                    component = "source",
                    op = "receive",
                    channel = self.channel.name(),
                    count = deliveries.len(),
                    "Received notifications"
                );
                deliveries
                    .into_iter()
                    .map(|delivery| JobRef::Notified { delivery })
                    .collect()
            }
            Ok(_) => {
                tokio::time::sleep(self.idle_delay).await;
                Vec::new()
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "source",
                    op = "receive",
                    channel = self.channel.name(),
                    error = %e,
                    "Notification receive failed, falling back to polling"
                );
                self.fallback.next_batch(max).await
            }
        }
    }

    async fn settle(&self, job: &JobRef, disposition: Disposition) {
        let Some(delivery) = job.delivery() else {
            return;
        };

        let result = match disposition {
            Disposition::Ack => self.channel.ack(delivery).await,
            Disposition::Abandon => {
                let abandoned = self.channel.abandon(delivery).await;
                if abandoned.is_ok() {
                    // The message is back in flight for this job.
                    if let Err(e) = self.jobs.mark_notified(delivery.job_id, Utc::now()).await {
                        warn!(
                            subsystem = "jobs",
                            component = "source",
                            op = "mark_notified",
                            job_id = %delivery.job_id,
                            error = %e,
                            "Failed to mark job notified after abandon"
                        );
                    }
                }
                abandoned
            }
            Disposition::Leave => Ok(()),
        };

        if let Err(e) = result {
            warn!(
                subsystem = "jobs",
                component = "source",
                op = "settle",
                job_id = %delivery.job_id,
                delivery_id = delivery.message_id,
                disposition = ?disposition,
                error = %e,
                "Failed to settle notification; visibility timeout will redeliver"
            );
        }
    }

    fn name(&self) -> &'static str {
        "notify"
    }
}
