//! # docqueue-core
//!
//! Core types, traits, and abstractions for the docqueue document job queue.
//!
//! This crate provides the job model, the error type, the store and
//! collaborator traits that the database and worker crates implement, and
//! the two pure utilities every stage relies on: chunking and retry with
//! backoff.

pub mod chunking;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod retry;
pub mod traits;

// Re-export commonly used types at crate root
pub use chunking::{Chunker, ChunkerConfig, SlidingWindowChunker};
pub use error::{Error, Result};
pub use models::*;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use traits::*;
