//! # docqueue-db
//!
//! PostgreSQL persistence for the docqueue job queue.
//!
//! This crate provides:
//! - Connection pool management
//! - `PgJobRepository`, the durable job store whose conditional updates
//!   implement lease acquire, renew, and release
//! - `PgNotificationChannel`, a visibility-timeout message table
//! - `PgChunkIndex`, chunk and embedding storage keyed by job
//! - In-memory implementations of all three for single-process use and tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use docqueue_core::{JobRepository, NewJob};
//! use docqueue_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/docqueue").await?;
//!     db.migrate().await?;
//!
//!     let job = db.jobs.create(NewJob::new("uploads/report.txt", "report.txt")).await?;
//!     println!("Queued job: {}", job.id);
//!     Ok(())
//! }
//! ```

pub mod chunk_index;
pub mod jobs;
pub mod memory;
pub mod notifications;
pub mod pool;
pub mod test_fixtures;

use std::sync::Arc;

pub use chunk_index::PgChunkIndex;
pub use jobs::PgJobRepository;
pub use memory::{InMemoryChunkIndex, InMemoryJobRepository, InMemoryNotificationChannel};
pub use notifications::{ChannelConfig, PgNotificationChannel};
pub use pool::{connect_pool, PoolConfig};

#[cfg(feature = "migrations")]
use docqueue_core::Error;
use docqueue_core::Result;

/// Database handle bundling the Postgres-backed stores.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job store and lease primitives.
    pub jobs: Arc<PgJobRepository>,
    /// Chunk and embedding storage.
    pub chunks: Arc<PgChunkIndex>,
}

impl Database {
    /// Create a new Database from an existing pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: Arc::new(PgJobRepository::new(pool.clone())),
            chunks: Arc::new(PgChunkIndex::new(pool.clone())),
            pool,
        }
    }

    /// Connect with default pool configuration.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = connect_pool(url, &PoolConfig::default()).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = connect_pool(url, &config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Build a notification channel over this database.
    pub fn notification_channel(&self, config: ChannelConfig) -> PgNotificationChannel {
        PgNotificationChannel::new(self.pool.clone(), config)
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            jobs: self.jobs.clone(),
            chunks: self.chunks.clone(),
        }
    }
}
