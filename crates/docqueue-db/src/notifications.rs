//! Postgres-backed notification channel.
//!
//! Messages live in `job_notification` and follow visibility-timeout
//! semantics: a receive claims visible rows with `FOR UPDATE SKIP LOCKED`,
//! stamps them with a fresh receipt, and hides them until `visible_at`.
//! Acknowledging deletes the row. Abandoning makes it visible immediately.
//! A receiver that dies simply lets the timeout lapse, after which the message
//! is delivered again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::{debug, trace};
use uuid::Uuid;

use docqueue_core::defaults;
use docqueue_core::{Delivery, Error, NotificationChannel, Result};

/// Default interval between claim attempts while a receive is waiting.
pub const DEFAULT_RECEIVE_POLL_MS: u64 = 1_000;

/// Notification channel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Maximum messages handed out per receive.
    pub max_messages: usize,
    /// Maximum time a receive waits for the first message.
    pub max_wait: Duration,
    /// How long a received message stays hidden before redelivery.
    pub visibility_timeout: Duration,
    /// Interval between claim attempts while waiting.
    pub receive_poll_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_messages: defaults::NOTIFY_MAX_MESSAGES,
            max_wait: Duration::from_secs(defaults::NOTIFY_MAX_WAIT_SECS),
            visibility_timeout: Duration::from_secs(defaults::NOTIFY_VISIBILITY_SECS),
            receive_poll_interval: Duration::from_millis(DEFAULT_RECEIVE_POLL_MS),
        }
    }
}

impl ChannelConfig {
    /// Load channel settings from the environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `NOTIFY_MAX_MESSAGES` | 4 |
    /// | `NOTIFY_MAX_WAIT_SECS` | 30 |
    /// | `NOTIFY_VISIBILITY_SECS` | 300 |
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = std::env::var("NOTIFY_MAX_MESSAGES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_messages = n;
        }
        if let Some(secs) = std::env::var("NOTIFY_MAX_WAIT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = std::env::var("NOTIFY_VISIBILITY_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.visibility_timeout = Duration::from_secs(secs);
        }
        config
    }

    pub fn with_max_messages(mut self, n: usize) -> Self {
        self.max_messages = n;
        self
    }

    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }
}

/// PostgreSQL implementation of NotificationChannel.
pub struct PgNotificationChannel {
    pool: Pool<Postgres>,
    config: ChannelConfig,
    /// Wakes waiting receivers in this process on publish.
    wake: Arc<Notify>,
}

impl PgNotificationChannel {
    pub fn new(pool: Pool<Postgres>, config: ChannelConfig) -> Self {
        Self {
            pool,
            config,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn visibility_deadline(&self, by: Duration) -> chrono::DateTime<Utc> {
        Utc::now()
            + chrono::Duration::from_std(by)
                .unwrap_or_else(|_| chrono::Duration::seconds(defaults::NOTIFY_VISIBILITY_SECS as i64))
    }

    async fn claim_visible(&self, max_messages: usize) -> Result<Vec<Delivery>> {
        let receipt = Uuid::new_v4();
        let rows = sqlx::query(
            "UPDATE job_notification
             SET receipt = $1, visible_at = $2, delivery_count = delivery_count + 1
             WHERE id IN (
                 SELECT id FROM job_notification
                 WHERE visible_at <= $3
                 ORDER BY visible_at, id
                 LIMIT $4
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, job_id, receipt, delivery_count",
        )
        .bind(receipt)
        .bind(self.visibility_deadline(self.config.visibility_timeout))
        .bind(Utc::now())
        .bind(max_messages as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Notification(format!("receive failed: {e}")))?;

        rows.iter()
            .map(|row| -> Result<Delivery> {
                Ok(Delivery {
                    message_id: row.try_get("id")?,
                    job_id: row.try_get("job_id")?,
                    receipt: row.try_get("receipt")?,
                    delivery_count: row.try_get("delivery_count")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl NotificationChannel for PgNotificationChannel {
    async fn publish(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("INSERT INTO job_notification (job_id, visible_at) VALUES ($1, $2)")
            .bind(job_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Notification(format!("publish failed: {e}")))?;

        trace!(
            subsystem = "db",
            component = "channel",
            op = "publish",
            job_id = %job_id,
            "Published job notification"
        );
        self.wake.notify_waiters();
        Ok(())
    }

    async fn receive(&self, max_messages: usize, max_wait: Duration) -> Result<Vec<Delivery>> {
        let deadline = Instant::now() + max_wait;
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.claim_visible(max_messages).await?;
            if !batch.is_empty() {
                debug!(
                    subsystem = "db",
                    component = "channel",
                    op = "receive",
                    count = batch.len(),
                    "Received job notifications"
                );
                return Ok(batch);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(vec![]);
            }
            tokio::select! {
                _ = tokio::time::sleep(remaining.min(self.config.receive_poll_interval)) => {}
                _ = &mut notified => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        sqlx::query("DELETE FROM job_notification WHERE id = $1 AND receipt = $2")
            .bind(delivery.message_id)
            .bind(delivery.receipt)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Notification(format!("ack failed: {e}")))?;
        Ok(())
    }

    async fn abandon(&self, delivery: &Delivery) -> Result<()> {
        sqlx::query(
            "UPDATE job_notification SET visible_at = $3, receipt = NULL
             WHERE id = $1 AND receipt = $2",
        )
        .bind(delivery.message_id)
        .bind(delivery.receipt)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Notification(format!("abandon failed: {e}")))?;

        self.wake.notify_waiters();
        Ok(())
    }

    async fn extend(&self, delivery: &Delivery, by: Duration) -> Result<()> {
        sqlx::query(
            "UPDATE job_notification SET visible_at = $3
             WHERE id = $1 AND receipt = $2",
        )
        .bind(delivery.message_id)
        .bind(delivery.receipt)
        .bind(self.visibility_deadline(by))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Notification(format!("extend failed: {e}")))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.max_messages, 4);
        assert_eq!(config.max_wait, Duration::from_secs(30));
        assert_eq!(config.visibility_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_channel_config_builder() {
        let config = ChannelConfig::default()
            .with_max_messages(10)
            .with_max_wait(Duration::from_secs(5))
            .with_visibility_timeout(Duration::from_secs(60));
        assert_eq!(config.max_messages, 10);
        assert_eq!(config.max_wait, Duration::from_secs(5));
        assert_eq!(config.visibility_timeout, Duration::from_secs(60));
    }
}
