//! In-memory implementations of the job store, notification channel, and
//! chunk index.
//!
//! They apply the same conditional transitions as the Postgres versions under
//! a mutex, which makes them suitable for single-process deployments and for
//! exercising worker behavior in tests without a database. Each store can be
//! switched to an unavailable mode to simulate outages.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use docqueue_core::{
    truncate_error, ChunkIndex, Delivery, Error, IndexedChunk, Job, JobProgress, JobRepository,
    JobStatus, Lease, NewJob, NotificationChannel, QueueStats, ReleaseFence, ReleaseOutcome,
    Result,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unavailable() -> Error {
    Error::Database(sqlx::Error::PoolTimedOut)
}

fn chrono_duration(d: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(d)
        .map_err(|e| Error::InvalidInput(format!("lease duration out of range: {e}")))
}

// =============================================================================
// JOB REPOSITORY
// =============================================================================

#[derive(Default)]
struct JobTable {
    jobs: HashMap<Uuid, Job>,
    /// Every progress value written per job, in order.
    progress_log: HashMap<Uuid, Vec<i32>>,
}

impl JobTable {
    fn set_progress(&mut self, job_id: Uuid, progress: i32) {
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.progress = progress;
        }
        self.progress_log.entry(job_id).or_default().push(progress);
    }

    fn sorted_by_updated(&self, filter: impl Fn(&Job) -> bool, limit: i64) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().filter(|j| filter(j)).cloned().collect();
        jobs.sort_by_key(|j| (j.updated_at, j.id));
        jobs.truncate(limit.max(0) as usize);
        jobs
    }
}

/// In-memory implementation of JobRepository.
#[derive(Clone, Default)]
pub struct InMemoryJobRepository {
    table: Arc<Mutex<JobTable>>,
    unavailable: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the job notification handle for event-driven waking.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Make every operation fail with a database error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Progress values written for a job, including resets and completion.
    pub fn progress_history(&self, job_id: Uuid) -> Vec<i32> {
        lock(&self.table)
            .progress_log
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Overwrite a job's lease expiry, e.g. to simulate a stalled worker.
    pub fn set_lease_expiry(&self, job_id: Uuid, expires_at: DateTime<Utc>) {
        if let Some(job) = lock(&self.table).jobs.get_mut(&job_id) {
            if job.status == JobStatus::Processing {
                job.lease_expires_at = Some(expires_at);
            }
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, new_job: NewJob) -> Result<Job> {
        self.check_available()?;
        if new_job.max_attempts < 1 {
            return Err(Error::InvalidInput("max_attempts must be at least 1".into()));
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::now_v7(),
            source_path: new_job.source_path,
            filename: new_job.filename,
            status: JobStatus::Queued,
            progress: 0,
            attempts: 0,
            max_attempts: new_job.max_attempts,
            lease_expires_at: None,
            lease_token: None,
            last_error: None,
            notified_at: None,
            chunk_count: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        lock(&self.table).jobs.insert(job.id, job.clone());
        self.notify.notify_waiters();
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        self.check_available()?;
        Ok(lock(&self.table).jobs.get(&job_id).cloned())
    }

    async fn get_progress(&self, job_id: Uuid) -> Result<Option<JobProgress>> {
        Ok(self.get(job_id).await?.map(|job| job.progress_view()))
    }

    async fn list_queued(&self, limit: i64) -> Result<Vec<Job>> {
        self.check_available()?;
        Ok(lock(&self.table).sorted_by_updated(
            |j| j.status == JobStatus::Queued && j.has_attempts_remaining(),
            limit,
        ))
    }

    async fn list_by_status(&self, status: JobStatus, limit: i64) -> Result<Vec<Job>> {
        self.check_available()?;
        Ok(lock(&self.table).sorted_by_updated(|j| j.status == status, limit))
    }

    async fn acquire(&self, job_id: Uuid, lease_duration: Duration) -> Result<Option<Lease>> {
        self.check_available()?;
        let now = Utc::now();
        let expires_at = now + chrono_duration(lease_duration)?;

        let mut table = lock(&self.table);
        let Some(job) = table.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Queued {
            return Ok(None);
        }
        if !job.has_attempts_remaining() {
            job.status = JobStatus::Failed;
            job.last_error.get_or_insert_with(|| "retry budget exhausted".to_string());
            job.notified_at = None;
            job.completed_at = Some(now);
            job.updated_at = now;
            return Ok(None);
        }

        let token = Uuid::new_v4();
        job.status = JobStatus::Processing;
        job.attempts += 1;
        job.lease_expires_at = Some(expires_at);
        job.lease_token = Some(token);
        job.started_at = Some(now);
        job.updated_at = now;
        let lease = Lease {
            job_id,
            attempt: job.attempts,
            token,
            expires_at,
        };
        table.set_progress(job_id, 0);
        Ok(Some(lease))
    }

    async fn renew(&self, lease: &Lease, lease_duration: Duration) -> Result<Option<Lease>> {
        self.check_available()?;
        let now = Utc::now();
        let expires_at = now + chrono_duration(lease_duration)?;

        let mut table = lock(&self.table);
        match table.jobs.get_mut(&lease.job_id) {
            Some(job)
                if ReleaseFence::holder(lease).admits(job) && !job.lease_expired_at(now) =>
            {
                job.lease_expires_at = Some(expires_at);
                Ok(Some(Lease {
                    expires_at,
                    ..*lease
                }))
            }
            _ => Ok(None),
        }
    }

    async fn update_progress(&self, lease: &Lease, progress: i32) -> Result<bool> {
        self.check_available()?;
        let progress = progress.clamp(0, 100);

        let mut table = lock(&self.table);
        let allowed = match table.jobs.get_mut(&lease.job_id) {
            Some(job)
                if ReleaseFence::holder(lease).admits(job) && job.progress <= progress =>
            {
                job.updated_at = Utc::now();
                true
            }
            _ => false,
        };
        if allowed {
            table.set_progress(lease.job_id, progress);
        }
        Ok(allowed)
    }

    async fn release(
        &self,
        job_id: Uuid,
        outcome: &ReleaseOutcome,
        fence: ReleaseFence,
    ) -> Result<Option<JobStatus>> {
        self.check_available()?;
        let now = Utc::now();

        let mut table = lock(&self.table);
        let Some(job) = table.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if !fence.admits(job) {
            return Ok(None);
        }

        job.lease_expires_at = None;
        job.lease_token = None;
        job.notified_at = None;
        job.updated_at = now;

        let new_progress = match outcome {
            ReleaseOutcome::Success { chunk_count } => {
                job.status = JobStatus::Completed;
                job.last_error = None;
                job.chunk_count = Some(*chunk_count);
                job.completed_at = Some(now);
                Some(100)
            }
            ReleaseOutcome::Failure { error } => {
                job.last_error = Some(truncate_error(error));
                if job.has_attempts_remaining() {
                    job.status = JobStatus::Queued;
                    Some(0)
                } else {
                    job.status = JobStatus::Failed;
                    job.completed_at = Some(now);
                    None
                }
            }
        };
        let status = job.status;
        if let Some(progress) = new_progress {
            table.set_progress(job_id, progress);
        }
        Ok(Some(status))
    }

    async fn find_expired_leases(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        self.check_available()?;
        let table = lock(&self.table);
        let mut jobs: Vec<Job> = table
            .jobs
            .values()
            .filter(|j| j.lease_expired_at(now))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.lease_expires_at);
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn mark_notified(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.check_available()?;
        match lock(&self.table).jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.notified_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_notified(&self, job_id: Uuid) -> Result<()> {
        self.check_available()?;
        if let Some(job) = lock(&self.table).jobs.get_mut(&job_id) {
            job.notified_at = None;
        }
        Ok(())
    }

    async fn list_needing_notification(
        &self,
        notified_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        self.check_available()?;
        Ok(lock(&self.table).sorted_by_updated(
            |j| {
                j.status == JobStatus::Queued
                    && j.has_attempts_remaining()
                    && j.notified_at.map(|at| at < notified_before).unwrap_or(true)
            },
            limit,
        ))
    }

    async fn force_requeue(&self, job_id: Uuid, reset_attempts: bool) -> Result<bool> {
        self.check_available()?;
        let mut table = lock(&self.table);
        let requeued = match table.jobs.get_mut(&job_id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Queued;
                job.lease_expires_at = None;
                job.lease_token = None;
                job.notified_at = None;
                job.updated_at = Utc::now();
                if reset_attempts {
                    job.attempts = 0;
                    job.last_error = None;
                }
                true
            }
            _ => false,
        };
        if requeued {
            table.set_progress(job_id, 0);
            self.notify.notify_waiters();
        }
        Ok(requeued)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        self.check_available()?;
        let table = lock(&self.table);
        let mut stats = QueueStats::default();
        for job in table.jobs.values() {
            stats.total += 1;
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => {
                    stats.processing += 1;
                    stats.progress_sum += job.progress as i64;
                }
                JobStatus::Completed => {
                    stats.completed += 1;
                    stats.progress_sum += 100;
                }
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

// =============================================================================
// NOTIFICATION CHANNEL
// =============================================================================

struct Message {
    id: i64,
    job_id: Uuid,
    receipt: Option<Uuid>,
    visible_at: Instant,
    delivery_count: i32,
}

/// In-memory implementation of NotificationChannel with visibility timeouts.
#[derive(Clone)]
pub struct InMemoryNotificationChannel {
    messages: Arc<Mutex<Vec<Message>>>,
    next_id: Arc<AtomicI64>,
    visibility_timeout: Duration,
    wake: Arc<Notify>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryNotificationChannel {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicI64::new(1)),
            visibility_timeout,
            wake: Arc::new(Notify::new()),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every operation fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Messages not yet acknowledged, visible or not.
    pub fn pending(&self) -> usize {
        lock(&self.messages).len()
    }

    /// Job ids of all unacknowledged messages, oldest first.
    pub fn pending_job_ids(&self) -> Vec<Uuid> {
        lock(&self.messages).iter().map(|m| m.job_id).collect()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::Notification("channel unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn claim_visible(&self, max_messages: usize) -> Vec<Delivery> {
        let now = Instant::now();
        let mut messages = lock(&self.messages);
        messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max_messages)
            .map(|m| {
                let receipt = Uuid::new_v4();
                m.receipt = Some(receipt);
                m.visible_at = now + self.visibility_timeout;
                m.delivery_count += 1;
                Delivery {
                    message_id: m.id,
                    job_id: m.job_id,
                    receipt,
                    delivery_count: m.delivery_count,
                }
            })
            .collect()
    }
}

impl Default for InMemoryNotificationChannel {
    fn default() -> Self {
        Self::new(Duration::from_secs(docqueue_core::defaults::NOTIFY_VISIBILITY_SECS))
    }
}

#[async_trait]
impl NotificationChannel for InMemoryNotificationChannel {
    async fn publish(&self, job_id: Uuid) -> Result<()> {
        self.check_available()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.messages).push(Message {
            id,
            job_id,
            receipt: None,
            visible_at: Instant::now(),
            delivery_count: 0,
        });
        self.wake.notify_waiters();
        Ok(())
    }

    async fn receive(&self, max_messages: usize, max_wait: Duration) -> Result<Vec<Delivery>> {
        let deadline = Instant::now() + max_wait;
        loop {
            self.check_available()?;
            // Registered before claiming so a publish in between still wakes us.
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.claim_visible(max_messages);
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }
            let next_visible = lock(&self.messages).iter().map(|m| m.visible_at).min();
            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = tokio::time::sleep_until(wake_at) => {}
                _ = &mut notified => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.check_available()?;
        lock(&self.messages)
            .retain(|m| !(m.id == delivery.message_id && m.receipt == Some(delivery.receipt)));
        Ok(())
    }

    async fn abandon(&self, delivery: &Delivery) -> Result<()> {
        self.check_available()?;
        let mut messages = lock(&self.messages);
        if let Some(m) = messages
            .iter_mut()
            .find(|m| m.id == delivery.message_id && m.receipt == Some(delivery.receipt))
        {
            m.receipt = None;
            m.visible_at = Instant::now();
        }
        drop(messages);
        self.wake.notify_waiters();
        Ok(())
    }

    async fn extend(&self, delivery: &Delivery, by: Duration) -> Result<()> {
        self.check_available()?;
        if let Some(m) = lock(&self.messages)
            .iter_mut()
            .find(|m| m.id == delivery.message_id && m.receipt == Some(delivery.receipt))
        {
            m.visible_at = Instant::now() + by;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// =============================================================================
// CHUNK INDEX
// =============================================================================

/// In-memory implementation of ChunkIndex.
#[derive(Clone, Default)]
pub struct InMemoryChunkIndex {
    chunks: Arc<Mutex<HashMap<Uuid, BTreeMap<i32, IndexedChunk>>>>,
}

impl InMemoryChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks stored for a job, ordered by chunk index.
    pub fn chunks_for(&self, job_id: Uuid) -> Vec<IndexedChunk> {
        lock(&self.chunks)
            .get(&job_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChunkIndex for InMemoryChunkIndex {
    async fn upsert(&self, job_id: Uuid, chunks: &[IndexedChunk]) -> Result<()> {
        let mut index = lock(&self.chunks);
        let entry = index.entry(job_id).or_default();
        for chunk in chunks {
            entry.insert(chunk.chunk.index, chunk.clone());
        }
        Ok(())
    }

    async fn delete_by_job(&self, job_id: Uuid) -> Result<u64> {
        Ok(lock(&self.chunks)
            .remove(&job_id)
            .map(|m| m.len() as u64)
            .unwrap_or(0))
    }
}
