//! Lease manager: exclusive, time-bounded claims on jobs.
//!
//! Every status, lease, and progress mutation made by workers and the
//! recovery sweeper goes through [`LeaseManager`]. The job repository's
//! conditional updates are the only serialization point, so any number of
//! managers across processes may operate on the same jobs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use docqueue_core::{
    defaults, truncate_error, Delivery, JobRepository, JobStatus, Lease, NotificationChannel,
    ReleaseFence, ReleaseOutcome, Result,
};

/// Acquire, renew, and release leases against a job repository.
#[derive(Clone)]
pub struct LeaseManager {
    jobs: Arc<dyn JobRepository>,
    lease_duration: Duration,
    acquire_timeout: Duration,
}

impl LeaseManager {
    /// Create a manager handing out leases of `lease_duration`.
    pub fn new(jobs: Arc<dyn JobRepository>, lease_duration: Duration) -> Self {
        Self {
            jobs,
            lease_duration,
            acquire_timeout: Duration::from_secs(defaults::LEASE_ACQUIRE_TIMEOUT_SECS),
        }
    }

    /// Bound on how long an acquire may wait on the store.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Try to take the lease on a queued job.
    ///
    /// Returns `None` on contention, on an exhausted budget, and when the
    /// store errors or does not answer within the acquire timeout.
    pub async fn acquire(&self, job_id: Uuid) -> Option<Lease> {
        let start = Instant::now();
        let result = tokio::time::timeout(
            self.acquire_timeout,
            self.jobs.acquire(job_id, self.lease_duration),
        )
        .await;

        match result {
            Ok(Ok(Some(lease))) => {
                debug!(
                    subsystem = "jobs",
                    component = "lease",
                    op = "acquire",
                    job_id = %job_id,
                    attempt = lease.attempt,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Lease acquired"
                );
                Some(lease)
            }
            Ok(Ok(None)) => {
                debug!(
                    subsystem = "jobs",
                    component = "lease",
                    op = "acquire",
                    job_id = %job_id,
                    "Lease not acquired: job not queued or budget exhausted"
                );
                None
            }
            Ok(Err(e)) => {
                warn!(
                    subsystem = "jobs",
                    component = "lease",
                    op = "acquire",
                    job_id = %job_id,
                    error = %e,
                    "Lease acquire failed, treating as not acquired"
                );
                None
            }
            Err(_) => {
                warn!(
                    subsystem = "jobs",
                    component = "lease",
                    op = "acquire",
                    job_id = %job_id,
                    timeout_ms = self.acquire_timeout.as_millis() as u64,
                    "Lease acquire timed out, treating as not acquired"
                );
                None
            }
        }
    }

    /// Extend a held lease. Best effort.
    ///
    /// Returns the extended lease, or `None` when the lease is no longer held
    /// or the store failed.
    pub async fn renew(&self, lease: &Lease) -> Option<Lease> {
        match self.jobs.renew(lease, self.lease_duration).await {
            Ok(Some(renewed)) => {
                debug!(
                    subsystem = "jobs",
                    component = "lease",
                    op = "renew",
                    job_id = %lease.job_id,
                    attempt = lease.attempt,
                    "Lease renewed"
                );
                Some(renewed)
            }
            Ok(None) => {
                warn!(
                    subsystem = "jobs",
                    component = "lease",
                    op = "renew",
                    job_id = %lease.job_id,
                    attempt = lease.attempt,
                    "Lease lost or already expired, renewal refused"
                );
                None
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "lease",
                    op = "renew",
                    job_id = %lease.job_id,
                    error = %e,
                    "Lease renewal failed"
                );
                None
            }
        }
    }

    /// Persist progress under a held lease. Best effort.
    pub async fn report_progress(&self, lease: &Lease, progress: i32) -> bool {
        match self.jobs.update_progress(lease, progress).await {
            Ok(written) => written,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "lease",
                    op = "update_progress",
                    job_id = %lease.job_id,
                    progress,
                    error = %e,
                    "Progress update failed"
                );
                false
            }
        }
    }

    /// Release a processing job with an outcome.
    ///
    /// Returns the new status, or `None` when `fence` did not admit the job.
    /// Store errors are logged here and returned; the job stays processing
    /// until its lease expires and the sweeper reclaims it.
    pub async fn release(
        &self,
        job_id: Uuid,
        outcome: &ReleaseOutcome,
        fence: ReleaseFence,
    ) -> Result<Option<JobStatus>> {
        let outcome = match outcome {
            ReleaseOutcome::Failure { error } => ReleaseOutcome::Failure {
                error: truncate_error(error),
            },
            success => success.clone(),
        };

        match self.jobs.release(job_id, &outcome, fence).await {
            Ok(status) => {
                if let Some(status) = status {
                    info!(
                        subsystem = "jobs",
                        component = "lease",
                        op = "release",
                        job_id = %job_id,
                        success = outcome.is_success(),
                        status = %status,
                        "Lease released"
                    );
                }
                Ok(status)
            }
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "lease",
                    op = "release",
                    job_id = %job_id,
                    success = outcome.is_success(),
                    error = %e,
                    "Lease release failed; job will be recovered after lease expiry"
                );
                Err(e)
            }
        }
    }

    /// Keep a lease alive in the background until the keeper is stopped.
    ///
    /// Every `interval` the lease is renewed and, when a delivery is given,
    /// the message's visibility is extended by the lease duration. The task
    /// ends on its own once the lease is lost.
    pub fn keep_alive(
        &self,
        lease: Lease,
        interval: Duration,
        delivery: Option<(Arc<dyn NotificationChannel>, Delivery)>,
    ) -> LeaseKeeper {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let mut current = lease;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match manager.renew(&current).await {
                    Some(renewed) => current = renewed,
                    None => {
                        // Lost for good only when the store answered that the
                        // lease is gone; transient errors keep retrying.
                        if !manager.still_held(&current).await {
                            break;
                        }
                    }
                }
                if let Some((ref channel, ref delivery)) = delivery {
                    if let Err(e) = channel.extend(delivery, manager.lease_duration).await {
                        warn!(
                            subsystem = "jobs",
                            component = "lease",
                            op = "extend_delivery",
                            job_id = %current.job_id,
                            delivery_id = delivery.message_id,
                            error = %e,
                            "Message visibility extension failed"
                        );
                    }
                }
            }
        });
        LeaseKeeper { handle }
    }

    async fn still_held(&self, lease: &Lease) -> bool {
        match self.jobs.get(lease.job_id).await {
            Ok(Some(job)) => ReleaseFence::holder(lease).admits(&job),
            Ok(None) => false,
            Err(_) => true,
        }
    }
}

/// Background renewal task for one lease. Stops when dropped.
pub struct LeaseKeeper {
    handle: JoinHandle<()>,
}

impl LeaseKeeper {
    /// Stop renewing.
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docqueue_core::NewJob;
    use docqueue_db::{InMemoryJobRepository, InMemoryNotificationChannel};

    const LEASE: Duration = Duration::from_secs(300);

    async fn setup() -> (InMemoryJobRepository, LeaseManager, Uuid) {
        let repo = InMemoryJobRepository::new();
        let job = repo.create(NewJob::new("a.txt", "a.txt")).await.unwrap();
        let manager = LeaseManager::new(Arc::new(repo.clone()), LEASE);
        (repo, manager, job.id)
    }

    #[tokio::test]
    async fn test_acquire_once() {
        let (_repo, manager, job_id) = setup().await;
        let lease = manager.acquire(job_id).await.unwrap();
        assert_eq!(lease.attempt, 1);
        assert!(manager.acquire(job_id).await.is_none());
    }

    #[tokio::test]
    async fn test_acquire_store_error_is_not_acquired() {
        let (repo, manager, job_id) = setup().await;
        repo.set_unavailable(true);
        assert!(manager.acquire(job_id).await.is_none());
        repo.set_unavailable(false);
        assert!(manager.acquire(job_id).await.is_some());
    }

    #[tokio::test]
    async fn test_release_truncates_error() {
        let (repo, manager, job_id) = setup().await;
        let lease = manager.acquire(job_id).await.unwrap();
        let long = "x".repeat(5000);
        let status = manager
            .release(job_id, &ReleaseOutcome::failure(long), ReleaseFence::holder(&lease))
            .await
            .unwrap();
        assert_eq!(status, Some(JobStatus::Queued));
        let job = repo.get(job_id).await.unwrap().unwrap();
        assert_eq!(
            job.last_error.unwrap().chars().count(),
            defaults::LAST_ERROR_MAX_CHARS
        );
    }

    #[tokio::test]
    async fn test_release_store_error_is_returned() {
        let (repo, manager, job_id) = setup().await;
        manager.acquire(job_id).await.unwrap();
        repo.set_unavailable(true);
        let result = manager
            .release(
                job_id,
                &ReleaseOutcome::Success { chunk_count: 1 },
                ReleaseFence::Unfenced,
            )
            .await;
        assert!(result.is_err());
        repo.set_unavailable(false);
        let job = repo.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_renew_after_reclaim_fails() {
        let (_repo, manager, job_id) = setup().await;
        let lease = manager.acquire(job_id).await.unwrap();
        manager
            .release(job_id, &ReleaseOutcome::failure("lost"), ReleaseFence::Unfenced)
            .await
            .unwrap();
        let second = manager.acquire(job_id).await.unwrap();
        assert!(manager.renew(&lease).await.is_none());
        assert!(manager.renew(&second).await.is_some());
    }

    #[tokio::test]
    async fn test_expired_lease_is_not_revived() {
        let (repo, manager, job_id) = setup().await;
        let lease = manager.acquire(job_id).await.unwrap();
        repo.set_lease_expiry(job_id, Utc::now() - chrono::Duration::seconds(1));
        assert!(manager.renew(&lease).await.is_none());

        let stored = repo.get(job_id).await.unwrap().unwrap();
        assert!(stored.lease_expired_at(Utc::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeper_renews_and_extends_delivery() {
        let (repo, manager, job_id) = setup().await;
        let channel = InMemoryNotificationChannel::new(Duration::from_secs(10));
        channel.publish(job_id).await.unwrap();
        let delivery = channel
            .receive(1, Duration::from_secs(1))
            .await
            .unwrap()
            .remove(0);

        let lease = manager.acquire(job_id).await.unwrap();
        let before = repo.get(job_id).await.unwrap().unwrap().lease_expires_at;
        let keeper = manager.keep_alive(
            lease,
            Duration::from_secs(5),
            Some((Arc::new(channel.clone()), delivery)),
        );

        // Past the original visibility timeout; the extension keeps it hidden.
        tokio::time::sleep(Duration::from_secs(12)).await;
        let visible = channel.receive(1, Duration::from_millis(10)).await.unwrap();
        assert!(visible.is_empty());

        let after = repo.get(job_id).await.unwrap().unwrap().lease_expires_at;
        assert!(after >= before);
        keeper.stop();
    }

    #[tokio::test]
    async fn test_report_progress_is_fenced() {
        let (repo, manager, job_id) = setup().await;
        let lease = manager.acquire(job_id).await.unwrap();
        assert!(manager.report_progress(&lease, 25).await);
        repo.set_lease_expiry(job_id, Utc::now());
        manager
            .release(job_id, &ReleaseOutcome::failure("reclaimed"), ReleaseFence::Unfenced)
            .await
            .unwrap();
        assert!(!manager.report_progress(&lease, 50).await);
    }
}
