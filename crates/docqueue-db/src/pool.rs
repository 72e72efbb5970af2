//! Database connection pool management.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use docqueue_core::defaults;
use docqueue_core::{Error, Result};

/// Pool sizing for the job store.
///
/// Every in-flight attempt holds a connection briefly for each renewal and
/// progress write, so `max_connections` should exceed the worker's
/// concurrency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::DB_MAX_CONNECTIONS,
            min_connections: defaults::DB_MIN_CONNECTIONS,
            acquire_timeout: Duration::from_secs(defaults::DB_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    /// Load pool settings from the environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DB_MAX_CONNECTIONS` | 10 |
    /// | `DB_MIN_CONNECTIONS` | 1 |
    /// | `DB_ACQUIRE_TIMEOUT_SECS` | 30 |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());
        let mut config = Self::default();
        if let Some(n) = parse("DB_MAX_CONNECTIONS") {
            config.max_connections = n as u32;
        }
        if let Some(n) = parse("DB_MIN_CONNECTIONS") {
            config.min_connections = n as u32;
        }
        if let Some(secs) = parse("DB_ACQUIRE_TIMEOUT_SECS") {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        // A floor above the ceiling would make sqlx reject the pool.
        config.min_connections = config.min_connections.min(config.max_connections);
        config
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self.min_connections = self.min_connections.min(n);
        self
    }
}

/// Open a connection pool.
pub async fn connect_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}
