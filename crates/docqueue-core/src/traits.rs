//! Core traits for the job store and pipeline collaborators.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// JOB REPOSITORY TRAITS
// =============================================================================

/// Durable store of document jobs.
///
/// Every transition of `status`, `lease_expires_at`, `attempts`, and
/// `progress` is a single conditional write, so concurrent callers are
/// linearized by the store itself.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create a job in `Queued` state with zero attempts.
    async fn create(&self, job: NewJob) -> Result<Job>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Lock-free progress snapshot for external callers.
    async fn get_progress(&self, job_id: Uuid) -> Result<Option<JobProgress>>;

    /// Queued jobs with attempts remaining, oldest `updated_at` first.
    async fn list_queued(&self, limit: i64) -> Result<Vec<Job>>;

    /// Jobs in `status`, oldest `updated_at` first.
    async fn list_by_status(&self, status: JobStatus, limit: i64) -> Result<Vec<Job>>;

    /// Transition Queued -> Processing, incrementing `attempts` and setting
    /// the lease expiry to now + `lease_duration`.
    ///
    /// Returns `None` when the job is not Queued or its attempts budget is
    /// spent. A Queued job with a spent budget is moved to Failed.
    async fn acquire(&self, job_id: Uuid, lease_duration: Duration) -> Result<Option<Lease>>;

    /// Extend a held lease to now + `lease_duration`.
    ///
    /// Returns `None` when the job is no longer Processing under
    /// `lease.token`, or when the lease has already expired. An expired lease
    /// belongs to the sweeper and is never revived.
    async fn renew(&self, lease: &Lease, lease_duration: Duration) -> Result<Option<Lease>>;

    /// Raise progress under a held lease. Never lowers it.
    async fn update_progress(&self, lease: &Lease, progress: i32) -> Result<bool>;

    /// Release a Processing job with the given outcome.
    ///
    /// Success completes the job. Failure requeues it while attempts remain,
    /// otherwise fails it terminally. The job must satisfy `fence`. Returns
    /// the resulting status, or `None` when the fence did not admit the job.
    async fn release(
        &self,
        job_id: Uuid,
        outcome: &ReleaseOutcome,
        fence: ReleaseFence,
    ) -> Result<Option<JobStatus>>;

    /// Processing jobs whose lease expired before `now`.
    async fn find_expired_leases(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>>;

    /// Record that a notification was published for a Queued job.
    async fn mark_notified(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Forget a notification mark, e.g. after a failed publish.
    async fn clear_notified(&self, job_id: Uuid) -> Result<()>;

    /// Queued jobs never notified, or notified before `notified_before`.
    async fn list_needing_notification(
        &self,
        notified_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>>;

    /// Operator override: put a non-terminal job back to Queued with no lease
    /// and zero progress. Returns false for unknown or terminal jobs.
    async fn force_requeue(&self, job_id: Uuid, reset_attempts: bool) -> Result<bool>;

    /// Get queue statistics.
    async fn queue_stats(&self) -> Result<QueueStats>;
}

// =============================================================================
// NOTIFICATION TRAITS
// =============================================================================

/// At-least-once "job may be ready" channel.
///
/// A received message stays invisible to other receivers until it is
/// acknowledged, abandoned, or its visibility timeout lapses.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Publish a job reference.
    async fn publish(&self, job_id: Uuid) -> Result<()>;

    /// Receive up to `max_messages`, waiting at most `max_wait` for the first.
    async fn receive(&self, max_messages: usize, max_wait: Duration) -> Result<Vec<Delivery>>;

    /// Remove a delivered message permanently.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Make a delivered message visible again for redelivery.
    async fn abandon(&self, delivery: &Delivery) -> Result<()>;

    /// Push back a delivered message's visibility timeout by `by`.
    async fn extend(&self, delivery: &Delivery, by: Duration) -> Result<()>;

    /// Channel name for logging.
    fn name(&self) -> &str;
}

// =============================================================================
// PIPELINE COLLABORATOR TRAITS
// =============================================================================

/// Source of raw document bytes.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Fetch the document at `path`. Fails with `NotFound` or `Timeout`.
    async fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}

/// Converts document bytes to text with page spans.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text. Fails with `UnsupportedFormat` or `Extraction`.
    async fn extract(&self, data: &[u8], filename: &str) -> Result<ExtractedText>;
}

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate one vector per input text, in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Get the model name.
    fn model_name(&self) -> &str;
}

/// Vector index keyed by job.
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    /// Insert or replace chunks keyed by (job, chunk index).
    async fn upsert(&self, job_id: Uuid, chunks: &[IndexedChunk]) -> Result<()>;

    /// Remove every chunk of a job. Returns the number removed.
    async fn delete_by_job(&self, job_id: Uuid) -> Result<u64>;
}
