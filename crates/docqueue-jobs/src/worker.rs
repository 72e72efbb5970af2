//! Job worker: pulls job references, runs attempts under a lease, and
//! settles deliveries.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use docqueue_core::{
    defaults, Delivery, Error, Job, JobRepository, JobStatus, NotificationChannel,
    ReleaseFence, ReleaseOutcome, Result, Stage,
};
use docqueue_db::Database;

use crate::handler::{JobContext, JobHandler};
use crate::lease::LeaseManager;
use crate::source::{Disposition, JobRef, JobSource, NotificationSource, PollingSource};

/// How the worker learns about ready jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Notification channel with polling fallback.
    Notify,
    /// Job store polling only.
    Poll,
}

impl FromStr for DeliveryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "notify" | "push" => Ok(DeliveryMode::Notify),
            "poll" | "polling" => Ok(DeliveryMode::Poll),
            other => Err(Error::Config(format!("unknown delivery mode: {other}"))),
        }
    }
}

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Pause after an empty notification receive, in milliseconds.
    pub notify_idle_ms: u64,
    /// Maximum number of concurrent attempts.
    pub max_concurrent_jobs: usize,
    /// Lease duration in seconds.
    pub lease_duration_secs: u64,
    /// Lease renewal interval in seconds.
    pub lease_renew_secs: u64,
    /// Delivery strategy.
    pub delivery_mode: DeliveryMode,
    /// Whether to enable job processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::WORKER_POLL_INTERVAL_MS,
            notify_idle_ms: defaults::WORKER_NOTIFY_IDLE_MS,
            max_concurrent_jobs: defaults::WORKER_MAX_CONCURRENT,
            lease_duration_secs: defaults::LEASE_DURATION_SECS,
            lease_renew_secs: defaults::LEASE_RENEW_INTERVAL_SECS,
            delivery_mode: DeliveryMode::Notify,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `WORKER_MAX_CONCURRENT` | `4` | Max concurrent attempts |
    /// | `WORKER_POLL_INTERVAL_MS` | `10000` | Polling interval when the queue is empty |
    /// | `WORKER_NOTIFY_IDLE_MS` | `5000` | Pause after an empty notification receive |
    /// | `WORKER_LEASE_SECS` | `300` | Lease duration |
    /// | `WORKER_LEASE_RENEW_SECS` | `120` | Lease renewal interval |
    /// | `WORKER_DELIVERY_MODE` | `notify` | `notify` or `poll` |
    pub fn from_env() -> Self {
        fn parse<T: FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok().and_then(|v| v.parse::<T>().ok())
        }

        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let delivery_mode = match std::env::var("WORKER_DELIVERY_MODE") {
            Ok(v) => v.parse().unwrap_or_else(|e| {
                warn!(error = %e, "Invalid WORKER_DELIVERY_MODE, using notify");
                DeliveryMode::Notify
            }),
            Err(_) => DeliveryMode::Notify,
        };

        Self {
            poll_interval_ms: parse("WORKER_POLL_INTERVAL_MS")
                .unwrap_or(defaults::WORKER_POLL_INTERVAL_MS),
            notify_idle_ms: parse("WORKER_NOTIFY_IDLE_MS").unwrap_or(defaults::WORKER_NOTIFY_IDLE_MS),
            max_concurrent_jobs: parse::<usize>("WORKER_MAX_CONCURRENT")
                .unwrap_or(defaults::WORKER_MAX_CONCURRENT)
                .max(1),
            lease_duration_secs: parse("WORKER_LEASE_SECS").unwrap_or(defaults::LEASE_DURATION_SECS),
            lease_renew_secs: parse("WORKER_LEASE_RENEW_SECS")
                .unwrap_or(defaults::LEASE_RENEW_INTERVAL_SECS),
            delivery_mode,
            enabled,
        }
    }

    /// Set the polling interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the pause after an empty notification receive.
    pub fn with_notify_idle(mut self, ms: u64) -> Self {
        self.notify_idle_ms = ms;
        self
    }

    /// Set maximum concurrent attempts.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Set lease duration and renewal interval.
    pub fn with_lease(mut self, duration_secs: u64, renew_secs: u64) -> Self {
        self.lease_duration_secs = duration_secs;
        self.lease_renew_secs = renew_secs;
        self
    }

    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn lease_renew_interval(&self) -> Duration {
        Duration::from_secs(self.lease_renew_secs.max(1))
    }
}

/// Event emitted by the job worker and the recovery sweeper.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
    /// A lease was acquired and an attempt started.
    JobStarted { job_id: Uuid, attempt: i32 },
    /// Progress was persisted for a running attempt.
    JobProgress {
        job_id: Uuid,
        stage: Stage,
        percent: i32,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: Uuid,
        chunk_count: i32,
        duration_ms: u64,
    },
    /// An attempt failed. `terminal` is set when the job became Failed.
    JobFailed {
        job_id: Uuid,
        error: String,
        terminal: bool,
    },
    /// Another holder won the lease, or the job could not be acquired.
    LeaseContended { job_id: Uuid },
    /// A notification arrived for a job that is no longer queued.
    StaleNotification {
        job_id: Uuid,
        status: Option<JobStatus>,
    },
    /// A recovery sweep finished.
    SweepCompleted {
        requeued: usize,
        failed: usize,
        republished: usize,
    },
}

/// How one job reference was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The job completed.
    Completed { chunk_count: i32 },
    /// The attempt failed and the job went back to the queue.
    Requeued { error: String },
    /// The attempt failed and the job's budget is spent.
    Failed { error: String },
    /// The lease was not acquired.
    NotAcquired,
    /// The job was missing or no longer queued.
    Stale,
    /// The lease was reclaimed before the result could be recorded.
    LeaseLost,
    /// The job store failed; the job's state was not changed by this worker.
    Errored,
}

impl AttemptOutcome {
    /// How the delivery that produced this attempt should be settled.
    pub fn disposition(&self) -> Disposition {
        match self {
            AttemptOutcome::Completed { .. }
            | AttemptOutcome::Failed { .. }
            | AttemptOutcome::Stale
            | AttemptOutcome::LeaseLost => Disposition::Ack,
            AttemptOutcome::Requeued { .. } | AttemptOutcome::NotAcquired => Disposition::Abandon,
            AttemptOutcome::Errored => Disposition::Leave,
        }
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    ///
    /// Attempts already running are finished first.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Wait for the worker loop to exit.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("worker task failed: {e}")))
    }
}

/// Job worker that processes jobs from a [`JobSource`].
pub struct JobWorker {
    config: WorkerConfig,
    source: Arc<dyn JobSource>,
    runner: JobWorkerRef,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let task = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    /// Run the worker loop.
    ///
    /// Takes up to `max_concurrent_jobs` references per batch and processes
    /// them concurrently. Only the source decides how long to wait when
    /// nothing is ready.
    #[instrument(skip(self, shutdown_rx), fields(source = self.source.name()))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            subsystem = "jobs",
            component = "worker",
            max_concurrent = self.config.max_concurrent_jobs,
            lease_secs = self.config.lease_duration_secs,
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let max_concurrent = self.config.max_concurrent_jobs;

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Job worker received shutdown signal");
                break;
            }

            let batch = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Job worker received shutdown signal");
                    break;
                }
                batch = self.source.next_batch(max_concurrent) => batch,
            };

            if batch.is_empty() {
                continue;
            }

            debug!(count = batch.len(), "Processing job batch");
            let mut tasks = JoinSet::new();
            for job_ref in batch {
                let runner = self.runner.clone();
                tasks.spawn(async move {
                    runner.handle(job_ref).await;
                });
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!(error = ?e, "Job task panicked");
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    /// Run a single attempt for `job_id` outside the worker loop.
    pub async fn process_job(&self, job_id: Uuid) -> AttemptOutcome {
        self.runner.handle(JobRef::Polled { job_id }).await
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Sender for components that publish on the worker's event stream.
    pub fn event_sender(&self) -> broadcast::Sender<WorkerEvent> {
        self.event_tx.clone()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Name of the active job source.
    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }
}

/// Lightweight reference bundle for running a single attempt in a spawned task.
#[derive(Clone)]
struct JobWorkerRef {
    jobs: Arc<dyn JobRepository>,
    leases: LeaseManager,
    handler: Arc<dyn JobHandler>,
    source: Arc<dyn JobSource>,
    channel: Option<Arc<dyn NotificationChannel>>,
    renew_interval: Duration,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorkerRef {
    /// Check state, run the attempt, and settle the delivery.
    async fn handle(&self, job_ref: JobRef) -> AttemptOutcome {
        let job_id = job_ref.job_id();

        let outcome = match self.jobs.get(job_id).await {
            Ok(Some(job)) if job.status == JobStatus::Queued => {
                self.run_attempt(job, job_ref.delivery()).await
            }
            Ok(found) => {
                let status = found.map(|j| j.status);
                debug!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    status = ?status,
                    "Job not queued, skipping"
                );
                if job_ref.delivery().is_some() {
                    let _ = self
                        .event_tx
                        .send(WorkerEvent::StaleNotification { job_id, status });
                }
                AttemptOutcome::Stale
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    error = %e,
                    "Failed to load job"
                );
                AttemptOutcome::Errored
            }
        };

        self.source.settle(&job_ref, outcome.disposition()).await;
        outcome
    }

    /// Acquire, run the handler, and release.
    async fn run_attempt(&self, job: Job, delivery: Option<&Delivery>) -> AttemptOutcome {
        let start = Instant::now();
        let job_id = job.id;

        let Some(lease) = self.leases.acquire(job_id).await else {
            let _ = self.event_tx.send(WorkerEvent::LeaseContended { job_id });
            return AttemptOutcome::NotAcquired;
        };

        info!(
            subsystem = "jobs",
            component = "worker",
            job_id = %job_id,
            attempt = lease.attempt,
            max_attempts = job.max_attempts,
            filename = %job.filename,
            "Processing job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            attempt: lease.attempt,
        });

        let extension = match (self.channel.as_ref(), delivery) {
            (Some(channel), Some(delivery)) => Some((channel.clone(), delivery.clone())),
            _ => None,
        };
        let keeper = self
            .leases
            .keep_alive(lease, self.renew_interval, extension);

        let leases = self.leases.clone();
        let event_tx = self.event_tx.clone();
        let ctx = JobContext::new(job, lease).with_progress_callback(move |stage| {
            let leases = leases.clone();
            let event_tx = event_tx.clone();
            Box::pin(async move {
                let percent = stage.progress();
                if leases.report_progress(&lease, percent).await {
                    let _ = event_tx.send(WorkerEvent::JobProgress {
                        job_id: lease.job_id,
                        stage,
                        percent,
                    });
                }
            })
        });

        let result = self.handler.execute(&ctx).await;
        keeper.stop();

        let outcome = result.into_outcome();
        let duration_ms = start.elapsed().as_millis() as u64;

        match self
            .leases
            .release(job_id, &outcome, ReleaseFence::holder(&lease))
            .await
        {
            Ok(Some(JobStatus::Completed)) => {
                let chunk_count = match outcome {
                    ReleaseOutcome::Success { chunk_count } => chunk_count,
                    ReleaseOutcome::Failure { .. } => 0,
                };
                info!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    attempt = lease.attempt,
                    chunk_count,
                    duration_ms,
                    "Job completed successfully"
                );
                let _ = self.event_tx.send(WorkerEvent::JobCompleted {
                    job_id,
                    chunk_count,
                    duration_ms,
                });
                AttemptOutcome::Completed { chunk_count }
            }
            Ok(Some(status @ (JobStatus::Queued | JobStatus::Failed))) => {
                let error = match outcome {
                    ReleaseOutcome::Failure { error } => error,
                    ReleaseOutcome::Success { .. } => String::new(),
                };
                let terminal = status == JobStatus::Failed;
                if terminal {
                    error!(
                        subsystem = "jobs",
                        component = "worker",
                        job_id = %job_id,
                        attempt = lease.attempt,
                        error = %error,
                        duration_ms,
                        "Job failed permanently"
                    );
                } else {
                    warn!(
                        subsystem = "jobs",
                        component = "worker",
                        job_id = %job_id,
                        attempt = lease.attempt,
                        error = %error,
                        duration_ms,
                        "Job attempt failed, requeued"
                    );
                }
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    job_id,
                    error: error.clone(),
                    terminal,
                });
                if terminal {
                    AttemptOutcome::Failed { error }
                } else {
                    AttemptOutcome::Requeued { error }
                }
            }
            Ok(_) => {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    attempt = lease.attempt,
                    "Lease lost before release, result discarded"
                );
                AttemptOutcome::LeaseLost
            }
            Err(_) => AttemptOutcome::Errored,
        }
    }
}

/// Builder for creating a job worker.
pub struct WorkerBuilder {
    jobs: Arc<dyn JobRepository>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    channel: Option<Arc<dyn NotificationChannel>>,
    wake: Option<Arc<Notify>>,
    source: Option<Arc<dyn JobSource>>,
    receive_limits: Option<(usize, Duration)>,
}

impl WorkerBuilder {
    /// Create a new worker builder.
    pub fn new(jobs: Arc<dyn JobRepository>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            jobs,
            handler,
            config: WorkerConfig::default(),
            channel: None,
            wake: None,
            source: None,
            receive_limits: None,
        }
    }

    /// Builder over a Postgres database, waking on jobs created in-process.
    pub fn from_database(db: &Database, handler: Arc<dyn JobHandler>) -> Self {
        let wake = db.jobs.job_notify();
        Self::new(db.jobs.clone(), handler).with_wake(wake)
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Notification channel used in notify mode.
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Wake polling early when `notify` fires.
    pub fn with_wake(mut self, notify: Arc<Notify>) -> Self {
        self.wake = Some(notify);
        self
    }

    /// Messages per notification receive and how long a receive may block.
    pub fn with_receive_limits(mut self, max_messages: usize, max_wait: Duration) -> Self {
        self.receive_limits = Some((max_messages, max_wait));
        self
    }

    /// Use a custom job source instead of the one implied by the config.
    pub fn with_source(mut self, source: Arc<dyn JobSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Build the worker.
    pub fn build(self) -> JobWorker {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_CHANNEL_CAPACITY);

        let mut polling = PollingSource::new(
            self.jobs.clone(),
            Duration::from_millis(self.config.poll_interval_ms),
        );
        if let Some(wake) = self.wake {
            polling = polling.with_wake(wake);
        }

        let channel = match (self.config.delivery_mode, self.channel) {
            (DeliveryMode::Notify, Some(channel)) => Some(channel),
            (DeliveryMode::Notify, None) => {
                warn!("Notify delivery requested without a channel, polling instead");
                None
            }
            (DeliveryMode::Poll, _) => None,
        };

        let source: Arc<dyn JobSource> = match (self.source, channel.as_ref()) {
            (Some(source), _) => source,
            (None, Some(channel)) => {
                let mut source =
                    NotificationSource::new(channel.clone(), self.jobs.clone(), polling)
                        .with_idle_delay(Duration::from_millis(self.config.notify_idle_ms));
                if let Some((max_messages, max_wait)) = self.receive_limits {
                    source = source.with_receive_limits(max_messages, max_wait);
                }
                Arc::new(source)
            }
            (None, None) => Arc::new(polling),
        };

        let leases = LeaseManager::new(self.jobs.clone(), self.config.lease_duration());
        let runner = JobWorkerRef {
            jobs: self.jobs,
            leases,
            handler: self.handler,
            source: source.clone(),
            channel,
            renew_interval: self.config.lease_renew_interval(),
            event_tx: event_tx.clone(),
        };

        JobWorker {
            config: self.config,
            source,
            runner,
            event_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, 10_000);
        assert_eq!(config.notify_idle_ms, 5_000);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.lease_duration(), Duration::from_secs(300));
        assert_eq!(config.lease_renew_interval(), Duration::from_secs(120));
        assert_eq!(config.delivery_mode, DeliveryMode::Notify);
        assert!(config.enabled);
    }

    #[test]
    fn test_config_builders() {
        let config = WorkerConfig::default()
            .with_poll_interval(50)
            .with_max_concurrent(0)
            .with_lease(30, 10)
            .with_delivery_mode(DeliveryMode::Poll)
            .with_enabled(false);
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.lease_duration(), Duration::from_secs(30));
        assert_eq!(config.delivery_mode, DeliveryMode::Poll);
        assert!(!config.enabled);
    }

    #[test]
    fn test_delivery_mode_parse() {
        assert_eq!("notify".parse::<DeliveryMode>().unwrap(), DeliveryMode::Notify);
        assert_eq!("POLL".parse::<DeliveryMode>().unwrap(), DeliveryMode::Poll);
        assert!("carrier-pigeon".parse::<DeliveryMode>().is_err());
    }

    #[test]
    fn test_dispositions() {
        assert_eq!(
            AttemptOutcome::Completed { chunk_count: 1 }.disposition(),
            Disposition::Ack
        );
        assert_eq!(
            AttemptOutcome::Failed { error: "x".into() }.disposition(),
            Disposition::Ack
        );
        assert_eq!(AttemptOutcome::Stale.disposition(), Disposition::Ack);
        assert_eq!(
            AttemptOutcome::Requeued { error: "x".into() }.disposition(),
            Disposition::Abandon
        );
        assert_eq!(AttemptOutcome::NotAcquired.disposition(), Disposition::Abandon);
        assert_eq!(AttemptOutcome::Errored.disposition(), Disposition::Leave);
    }
}
