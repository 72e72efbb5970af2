//! # docqueue-worker
//!
//! Process setup shared by the `docqueue-worker` daemon and the
//! `docqueue-admin` operator CLI.

pub mod telemetry;

use docqueue_db::{Database, PoolConfig};
use tracing::info;

/// Database URL used when `DATABASE_URL` is unset.
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/docqueue";

/// Connect to the database named by `DATABASE_URL` and apply migrations.
pub async fn connect_database() -> anyhow::Result<Database> {
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

    info!("Connecting to database...");
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    Ok(db)
}
