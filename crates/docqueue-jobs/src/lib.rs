//! # docqueue-jobs
//!
//! Lease-based document job processing.
//!
//! This crate provides:
//! - Lease acquisition, renewal, and release through [`LeaseManager`]
//! - The download, extract, chunk, embed, index pipeline with per-stage timeouts
//! - A worker loop over pluggable job sources (polling, or notifications with
//!   a polling fallback)
//! - A recovery sweeper for leases abandoned by crashed workers
//! - Operator access to progress, forced requeue, and queue summaries
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use docqueue_db::{ChannelConfig, Database};
//! use docqueue_jobs::{DocumentPipeline, WorkerBuilder, WorkerConfig};
//!
//! let db = Database::connect("postgres://...").await?;
//! let channel = Arc::new(db.notification_channel(ChannelConfig::from_env()));
//!
//! let pipeline = DocumentPipeline::new(storage, extractor, embedder, db.chunks.clone());
//! let worker = WorkerBuilder::from_database(&db, Arc::new(pipeline))
//!     .with_config(WorkerConfig::from_env())
//!     .with_channel(channel)
//!     .build();
//!
//! let handle = worker.start();
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod adapters;
pub mod admin;
pub mod handler;
pub mod lease;
pub mod pipeline;
pub mod producer;
pub mod source;
pub mod sweeper;
pub mod worker;

// Re-export core types
pub use docqueue_core::*;

pub use adapters::{FilesystemStorage, PlainTextExtractor};
pub use admin::{AdminService, QueueSummary, StuckJob};
pub use handler::{JobContext, JobHandler, JobResult, ProgressCallback};
pub use lease::{LeaseKeeper, LeaseManager};
pub use pipeline::{DocumentPipeline, StageTimeouts};
pub use producer::JobProducer;
pub use source::{Disposition, JobRef, JobSource, NotificationSource, PollingSource};
pub use sweeper::{RecoverySweeper, SweepReport, SweeperConfig, SweeperHandle};
pub use worker::{
    AttemptOutcome, DeliveryMode, JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent,
    WorkerHandle,
};
