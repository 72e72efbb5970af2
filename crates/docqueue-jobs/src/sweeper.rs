//! Recovery sweeper: reclaim jobs whose lease expired and re-announce
//! queued jobs whose notification may have been lost.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use docqueue_core::{
    defaults, Error, JobRepository, JobStatus, ReleaseFence, ReleaseOutcome, Result,
};

use crate::lease::LeaseManager;
use crate::producer::JobProducer;
use crate::worker::WorkerEvent;

/// Configuration for the recovery sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Maximum jobs handled per pass.
    pub batch_size: i64,
    /// Queued jobs notified longer ago than this are announced again.
    pub republish_after: Duration,
    pub enabled: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(defaults::SWEEPER_INTERVAL_SECS),
            batch_size: defaults::SWEEPER_BATCH_SIZE,
            republish_after: Duration::from_secs(defaults::SWEEPER_REPUBLISH_AFTER_SECS),
            enabled: true,
        }
    }
}

impl SweeperConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SWEEPER_ENABLED` | `true` |
    /// | `SWEEPER_INTERVAL_SECS` | `60` |
    /// | `SWEEPER_BATCH_SIZE` | `100` |
    /// | `SWEEPER_REPUBLISH_AFTER_SECS` | `600` |
    pub fn from_env() -> Self {
        fn secs(var: &str, default: u64) -> Duration {
            Duration::from_secs(
                std::env::var(var)
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .filter(|&v| v > 0)
                    .unwrap_or(default),
            )
        }

        Self {
            interval: secs("SWEEPER_INTERVAL_SECS", defaults::SWEEPER_INTERVAL_SECS),
            batch_size: std::env::var("SWEEPER_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|&v| v > 0)
                .unwrap_or(defaults::SWEEPER_BATCH_SIZE),
            republish_after: secs(
                "SWEEPER_REPUBLISH_AFTER_SECS",
                defaults::SWEEPER_REPUBLISH_AFTER_SECS,
            ),
            enabled: std::env::var("SWEEPER_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_republish_after(mut self, after: Duration) -> Self {
        self.republish_after = after;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepReport {
    /// Expired jobs returned to the queue.
    pub requeued: usize,
    /// Expired jobs whose attempt budget was spent.
    pub failed: usize,
    /// Expired jobs that changed state before the sweeper reached them.
    pub skipped: usize,
    /// Queued jobs announced again.
    pub republished: usize,
}

/// Periodic recovery of abandoned leases.
pub struct RecoverySweeper {
    jobs: Arc<dyn JobRepository>,
    leases: LeaseManager,
    producer: Option<JobProducer>,
    events: Option<broadcast::Sender<WorkerEvent>>,
    config: SweeperConfig,
}

impl RecoverySweeper {
    pub fn new(jobs: Arc<dyn JobRepository>, leases: LeaseManager) -> Self {
        Self {
            jobs,
            leases,
            producer: None,
            events: None,
            config: SweeperConfig::default(),
        }
    }

    /// Re-announce queued jobs through `producer`.
    pub fn with_producer(mut self, producer: JobProducer) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Publish [`WorkerEvent::SweepCompleted`] on `events`.
    pub fn with_events(mut self, events: broadcast::Sender<WorkerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_config(mut self, config: SweeperConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Sweep against the current time.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep as if the clock read `now`.
    ///
    /// Each expired job is released as a failure fenced on the lease token
    /// the sweeper observed and on that lease still being expired at `now`.
    /// A job renewed or re-acquired in between is left alone.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let expired = self
            .jobs
            .find_expired_leases(now, self.config.batch_size)
            .await?;

        for job in expired {
            let Some(token) = job.lease_token else {
                report.skipped += 1;
                continue;
            };
            let outcome = ReleaseOutcome::failure(defaults::LEASE_EXPIRED_ERROR);
            let fence = ReleaseFence::Expired { token, now };
            match self.leases.release(job.id, &outcome, fence).await {
                Ok(Some(JobStatus::Queued)) => {
                    warn!(
                        subsystem = "jobs",
                        component = "sweeper",
                        job_id = %job.id,
                        attempt = job.attempts,
                        "Reclaimed expired lease, job requeued"
                    );
                    report.requeued += 1;
                }
                Ok(Some(JobStatus::Failed)) => {
                    warn!(
                        subsystem = "jobs",
                        component = "sweeper",
                        job_id = %job.id,
                        attempt = job.attempts,
                        "Reclaimed expired lease, attempts exhausted"
                    );
                    report.failed += 1;
                }
                Ok(_) => report.skipped += 1,
                // Logged by the lease manager; the next sweep retries.
                Err(_) => report.skipped += 1,
            }
        }

        if let Some(ref producer) = self.producer {
            let threshold = now - to_chrono(self.config.republish_after);
            match self
                .jobs
                .list_needing_notification(threshold, self.config.batch_size)
                .await
            {
                Ok(jobs) => {
                    for job in jobs {
                        if producer.announce(job.id).await {
                            report.republished += 1;
                        }
                    }
                }
                Err(e) => warn!(
                    subsystem = "jobs",
                    component = "sweeper",
                    op = "republish",
                    error = %e,
                    "Failed to list jobs needing notification"
                ),
            }
        }

        if report.requeued + report.failed + report.republished > 0 {
            info!(
                subsystem = "jobs",
                component = "sweeper",
                requeued = report.requeued,
                failed = report.failed,
                skipped = report.skipped,
                republished = report.republished,
                "Sweep completed"
            );
        } else {
            debug!(subsystem = "jobs", component = "sweeper", "Sweep found nothing");
        }

        if let Some(ref events) = self.events {
            let _ = events.send(WorkerEvent::SweepCompleted {
                requeued: report.requeued,
                failed: report.failed,
                republished: report.republished,
            });
        }

        Ok(report)
    }

    /// Run a sweep now and then every interval until shut down.
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            if !self.config.enabled {
                info!("Recovery sweeper is disabled, not starting");
                return;
            }

            info!(
                subsystem = "jobs",
                component = "sweeper",
                interval_secs = self.config.interval.as_secs(),
                "Recovery sweeper started"
            );

            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            warn!(
                                subsystem = "jobs",
                                component = "sweeper",
                                error = %e,
                                "Sweep failed"
                            );
                        }
                    }
                }
            }

            info!("Recovery sweeper stopped");
        });

        SweeperHandle { shutdown_tx, task }
    }
}

/// Handle for a running sweeper.
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop after the sweep in progress, if any.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))
    }

    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("sweeper task failed: {e}")))
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
