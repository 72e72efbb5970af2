//! Retry with exponential backoff for collaborator calls.
//!
//! Only errors that [`crate::Error::is_retryable`] classifies as transient are
//! retried. Anything else is returned on the first failure so the job's own
//! attempts budget handles it.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::defaults;
use crate::error::Result;

/// Backoff schedule for [`retry_with_backoff`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first call. Zero disables retrying.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in [0.75, 1.25].
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::EMBED_MAX_RETRIES,
            initial_backoff: Duration::from_millis(defaults::RETRY_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(defaults::RETRY_MAX_BACKOFF_MS),
            backoff_multiplier: defaults::RETRY_BACKOFF_MULTIPLIER,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Load from environment variables, falling back to defaults.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `EMBED_MAX_RETRIES` | 3 |
    /// | `RETRY_INITIAL_BACKOFF_MS` | 1000 |
    /// | `RETRY_MAX_BACKOFF_MS` | 30000 |
    pub fn from_env() -> Self {
        let mut policy = Self::default();
        if let Some(v) = std::env::var("EMBED_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            policy.max_retries = v;
        }
        if let Some(v) = std::env::var("RETRY_INITIAL_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            policy.initial_backoff = Duration::from_millis(v);
        }
        if let Some(v) = std::env::var("RETRY_MAX_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            policy.max_backoff = Duration::from_millis(v);
        }
        policy
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (0-based), capped at `max_backoff`.
    pub fn backoff_for_retry(&self, retry: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(retry as i32);
        let backoff = if base >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(base)
        };
        if !self.jitter {
            return backoff;
        }
        let factor = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_secs_f64(backoff.as_secs_f64() * factor).min(self.max_backoff)
    }
}

/// Run `op`, retrying retryable errors per `policy`.
///
/// `label` names the call in logs.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => {
                if retry > 0 {
                    debug!(op = label, retries = retry, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && retry < policy.max_retries => {
                let backoff = policy.backoff_for_retry(retry);
                warn!(
                    op = label,
                    retry = retry + 1,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retryable error, backing off"
                );
                tokio::time::sleep(backoff).await;
                retry += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!(op = label, max_retries = policy.max_retries, error = %e, "Retries exhausted");
                }
                return Err(e);
            }
        }
    }
}
