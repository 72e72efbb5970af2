//! Data models for the document job queue.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::error::Error;

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a document job.
///
/// `Queued` is initial, `Completed` and `Failed` are terminal. A job in
/// `Processing` always carries a lease expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown job status: {other}"))),
        }
    }
}

/// A document processing job. One row per document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Storage reference handed to the storage collaborator.
    pub source_path: String,
    /// Original file name, used as the extraction format hint.
    pub filename: String,
    pub status: JobStatus,
    pub progress: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Token of the current lease; set exactly while Processing.
    pub lease_token: Option<Uuid>,
    pub last_error: Option<String>,
    pub notified_at: Option<DateTime<Utc>>,
    pub chunk_count: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether another acquire is allowed by the attempts budget.
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Whether the job holds a lease that has passed its expiry at `now`.
    pub fn lease_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && self.lease_expires_at.map(|exp| exp < now).unwrap_or(false)
    }

    pub fn progress_view(&self) -> JobProgress {
        JobProgress {
            job_id: self.id,
            status: self.status,
            progress: self.progress,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            last_error: self.last_error.clone(),
            chunk_count: self.chunk_count,
            updated_at: self.updated_at,
        }
    }
}

/// Request to create a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub source_path: String,
    pub filename: String,
    pub max_attempts: i32,
}

impl NewJob {
    pub fn new(source_path: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            filename: filename.into(),
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// An exclusive, time-bounded claim on a job.
///
/// `token` is fresh for every acquisition and fences every later write made
/// under this lease. `attempt` is informational: an admin reset rewinds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub job_id: Uuid,
    pub attempt: i32,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Condition a release must meet to take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseFence {
    /// Any Processing job. Operator tooling only.
    Unfenced,
    /// The job is still held under this lease token.
    Holder(Uuid),
    /// The job is still held under this token and its lease is still
    /// expired at `now`. A renewal in between defeats the release.
    Expired { token: Uuid, now: DateTime<Utc> },
}

impl ReleaseFence {
    pub fn holder(lease: &Lease) -> Self {
        ReleaseFence::Holder(lease.token)
    }

    pub fn token(&self) -> Option<Uuid> {
        match *self {
            ReleaseFence::Unfenced => None,
            ReleaseFence::Holder(token) | ReleaseFence::Expired { token, .. } => Some(token),
        }
    }

    /// Upper bound on the lease expiry, for recovery releases.
    pub fn expired_before(&self) -> Option<DateTime<Utc>> {
        match *self {
            ReleaseFence::Expired { now, .. } => Some(now),
            _ => None,
        }
    }

    /// Whether `job` in its current state satisfies the fence.
    pub fn admits(&self, job: &Job) -> bool {
        if job.status != JobStatus::Processing {
            return false;
        }
        let token_ok = self.token().map_or(true, |t| job.lease_token == Some(t));
        let expiry_ok = self
            .expired_before()
            .map_or(true, |now| job.lease_expired_at(now));
        token_ok && expiry_ok
    }
}

/// Outcome reported when a lease is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Success { chunk_count: i32 },
    Failure { error: String },
}

impl ReleaseOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        ReleaseOutcome::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReleaseOutcome::Success { .. })
    }
}

/// Truncate a failure message to the stored `last_error` bound.
///
/// Cuts on a character boundary.
pub fn truncate_error(message: &str) -> String {
    match message.char_indices().nth(defaults::LAST_ERROR_MAX_CHARS) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

// =============================================================================
// PIPELINE STAGES
// =============================================================================

/// Pipeline stage of a processing attempt.
///
/// `progress()` is the value persisted when the stage is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Downloading,
    Extracting,
    Chunking,
    Embedding,
    Indexing,
    Done,
}

impl Stage {
    /// Stages in execution order.
    pub const PIPELINE: [Stage; 5] = [
        Stage::Downloading,
        Stage::Extracting,
        Stage::Chunking,
        Stage::Embedding,
        Stage::Indexing,
    ];

    pub fn progress(&self) -> i32 {
        match self {
            Stage::Downloading => 10,
            Stage::Extracting => 25,
            Stage::Chunking => 50,
            Stage::Embedding => 70,
            Stage::Indexing => 90,
            Stage::Done => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Downloading => "downloading",
            Stage::Extracting => "extracting",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::Indexing => "indexing",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PROGRESS QUERY
// =============================================================================

/// Externally visible snapshot of a job's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub chunk_count: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

impl JobProgress {
    /// Human-readable description of what the job is doing.
    pub fn status_detail(&self) -> &'static str {
        match self.status {
            JobStatus::Queued => "Waiting in queue",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Processing => match self.progress {
                p if p < 15 => "Downloading document...",
                p if p < 30 => "Extracting text...",
                p if p < 55 => "Chunking content...",
                p if p < 75 => "Generating embeddings...",
                p if p < 95 => "Indexing in search...",
                _ => "Finalizing...",
            },
        }
    }
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
    /// Completed jobs count 100, processing jobs their current progress.
    pub progress_sum: i64,
}

impl QueueStats {
    /// Average progress across all jobs, 0-100.
    pub fn overall_progress(&self) -> i64 {
        if self.total == 0 {
            0
        } else {
            self.progress_sum / self.total
        }
    }
}

// =============================================================================
// TEXT AND CHUNKS
// =============================================================================

/// Character range of one source page within extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpan {
    pub page_num: i32,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Output of the extraction collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub text: String,
    pub page_spans: Vec<PageSpan>,
}

impl ExtractedText {
    /// Text with a single page spanning all of it.
    pub fn single_page(text: impl Into<String>) -> Self {
        let text = text.into();
        let len = text.chars().count();
        Self {
            text,
            page_spans: vec![PageSpan {
                page_num: 1,
                start_offset: 0,
                end_offset: len,
            }],
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A window of extracted text. Offsets are in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub index: i32,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    /// Pages overlapped by this chunk, ascending.
    pub page_numbers: Vec<i32>,
}

impl TextChunk {
    pub fn primary_page(&self) -> Option<i32> {
        self.page_numbers.first().copied()
    }
}

/// A chunk together with its embedding, ready for the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: TextChunk,
    pub vector: Vec<f32>,
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// A "job may be ready" message handed out by a notification channel.
///
/// `receipt` identifies this particular delivery; settling a message with a
/// receipt from an earlier delivery is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub message_id: i64,
    pub job_id: Uuid,
    pub receipt: Uuid,
    pub delivery_count: i32,
}
