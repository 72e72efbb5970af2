//! Centralized default constants for docqueue.
//!
//! All crates reference these constants instead of defining their own magic
//! numbers. Config structs use them for their `Default` impls and as
//! fallbacks when an environment variable is unset or unparseable.

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Attempts budget per job before it is marked terminally failed.
pub const JOB_MAX_ATTEMPTS: i32 = 3;

/// Lease duration granted on acquire (seconds).
pub const LEASE_DURATION_SECS: u64 = 300;

/// Interval at which a held lease is renewed while stages run (seconds).
pub const LEASE_RENEW_INTERVAL_SECS: u64 = 120;

/// Upper bound on a single lease acquire round-trip (seconds).
pub const LEASE_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Maximum stored length of `last_error`, in characters.
pub const LAST_ERROR_MAX_CHARS: usize = 1000;

/// Processing jobs started longer ago than this are reported as stuck (seconds).
pub const STUCK_AFTER_SECS: i64 = 600;

// =============================================================================
// WORKER
// =============================================================================

/// Poll interval when the worker discovers jobs by querying the store (ms).
pub const WORKER_POLL_INTERVAL_MS: u64 = 10_000;

/// Idle delay between receive cycles when notifications are enabled (ms).
pub const WORKER_NOTIFY_IDLE_MS: u64 = 5_000;

/// Maximum jobs processed concurrently by one worker.
pub const WORKER_MAX_CONCURRENT: usize = 4;

/// Capacity of the worker event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// STAGE TIMEOUTS (seconds)
// =============================================================================

pub const STAGE_TIMEOUT_DOWNLOAD_SECS: u64 = 60;
pub const STAGE_TIMEOUT_EXTRACT_SECS: u64 = 600;
pub const STAGE_TIMEOUT_CHUNK_SECS: u64 = 30;
pub const STAGE_TIMEOUT_EMBED_SECS: u64 = 180;
pub const STAGE_TIMEOUT_INDEX_SECS: u64 = 60;

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Maximum messages taken from the channel per receive.
pub const NOTIFY_MAX_MESSAGES: usize = 4;

/// Maximum time a receive blocks waiting for messages (seconds).
pub const NOTIFY_MAX_WAIT_SECS: u64 = 30;

/// How long a received message stays invisible before redelivery (seconds).
pub const NOTIFY_VISIBILITY_SECS: u64 = 300;

// =============================================================================
// RECOVERY SWEEPER
// =============================================================================

/// Interval between sweeps (seconds).
pub const SWEEPER_INTERVAL_SECS: u64 = 60;

/// Maximum expired leases reclaimed per sweep.
pub const SWEEPER_BATCH_SIZE: i64 = 100;

/// Queued jobs notified longer ago than this are published again (seconds).
pub const SWEEPER_REPUBLISH_AFTER_SECS: u64 = 600;

/// Error recorded on jobs reclaimed from an expired lease.
pub const LEASE_EXPIRED_ERROR: &str = "lease expired - worker may have crashed";

// =============================================================================
// CHUNKING
// =============================================================================

/// Target characters per chunk.
pub const CHUNK_SIZE: usize = 1000;

/// Overlap characters between adjacent chunks.
pub const CHUNK_OVERLAP: usize = 200;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Texts sent to the embedding backend per request.
pub const EMBED_BATCH_SIZE: usize = 16;

/// Inputs longer than this are truncated before embedding (characters).
pub const EMBED_MAX_INPUT_CHARS: usize = 8000;

/// Default embedding model name.
pub const EMBED_MODEL: &str = "text-embedding-3-small";

/// Default embedding vector dimension.
pub const EMBED_DIMENSION: usize = 1536;

/// Retries for a rate-limited embedding batch.
pub const EMBED_MAX_RETRIES: u32 = 3;

/// First retry delay (ms).
pub const RETRY_INITIAL_BACKOFF_MS: u64 = 1_000;

/// Retry delay ceiling (ms).
pub const RETRY_MAX_BACKOFF_MS: u64 = 30_000;

/// Growth factor between retry delays.
pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

// =============================================================================
// DATABASE
// =============================================================================

/// Default maximum pool connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Default minimum idle pool connections.
pub const DB_MIN_CONNECTIONS: u32 = 1;

/// Default pool acquire timeout (seconds).
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;
