//! Structured logging schema and field name constants for docqueue.
//!
//! Every crate logs through `tracing` with these field names so log
//! aggregation can query job lifecycles across the worker, sweeper, and
//! database layers.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | A state guarantee is at risk (release failed, sweep failed) |
//! | WARN  | Recoverable issue: stage failure, renewal miss, channel fallback |
//! | INFO  | Lifecycle events (startup, shutdown), job completions |
//! | DEBUG | Decision points: lease contention, stale notifications, stage timings |
//! | TRACE | Per-batch detail (embedding batches, individual deliveries) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "jobs", "db", "inference"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "worker", "lease", "sweeper", "pipeline", "pool", "channel"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "acquire", "release", "renew", "sweep", "embed_texts"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Attempt number (fencing token) of the current lease.
pub const ATTEMPT: &str = "attempt";

/// Notification message identifier.
pub const DELIVERY_ID: &str = "delivery_id";

/// Pipeline stage name.
pub const STAGE: &str = "stage";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks produced or indexed.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of input texts sent to an embedding model.
pub const INPUT_COUNT: &str = "input_count";

/// Progress percentage (0-100).
pub const PROGRESS: &str = "progress";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
