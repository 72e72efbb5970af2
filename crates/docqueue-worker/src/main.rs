//! docqueue-worker: processes queued documents until interrupted.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use docqueue_core::{
    ChunkerConfig, JobRepository, NotificationChannel, RetryPolicy, SlidingWindowChunker,
};
use docqueue_db::ChannelConfig;
use docqueue_inference::OpenAIEmbedder;
use docqueue_jobs::{
    DeliveryMode, DocumentPipeline, FilesystemStorage, JobProducer, LeaseManager,
    PlainTextExtractor, RecoverySweeper, StageTimeouts, SweeperConfig, WorkerBuilder,
    WorkerConfig, WorkerEvent,
};
use docqueue_worker::{connect_database, telemetry::LogSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let _file_guard = LogSettings::from_env().init("docqueue-worker.log");

    let db = connect_database().await?;

    let worker_config = WorkerConfig::from_env();
    let channel_config = ChannelConfig::from_env();
    let channel: Arc<dyn NotificationChannel> =
        Arc::new(db.notification_channel(channel_config.clone()));

    let chunker_config = ChunkerConfig::from_env();
    chunker_config.validate()?;
    let embedder = OpenAIEmbedder::from_env()?;
    info!(
        model = %embedder.config().embed_model,
        base_url = %embedder.config().base_url,
        "Embedding backend configured"
    );

    let storage = FilesystemStorage::from_env();
    info!(root = %storage.root().display(), "Document storage configured");

    let pipeline = DocumentPipeline::new(
        Arc::new(storage),
        Arc::new(PlainTextExtractor),
        Arc::new(embedder),
        db.chunks.clone(),
    )
    .with_chunker(Arc::new(SlidingWindowChunker::new(chunker_config)))
    .with_timeouts(StageTimeouts::from_env())
    .with_retry_policy(RetryPolicy::from_env());

    let worker = WorkerBuilder::from_database(&db, Arc::new(pipeline))
        .with_config(worker_config.clone())
        .with_channel(channel.clone())
        .with_receive_limits(channel_config.max_messages, channel_config.max_wait)
        .build();
    info!(
        source = worker.source_name(),
        max_concurrent = worker_config.max_concurrent_jobs,
        "Job worker configured"
    );

    let jobs: Arc<dyn JobRepository> = db.jobs.clone();
    let mut producer = JobProducer::new(jobs.clone());
    if worker_config.delivery_mode == DeliveryMode::Notify {
        producer = producer.with_channel(channel);
    }
    let sweeper = RecoverySweeper::new(
        jobs.clone(),
        LeaseManager::new(jobs, worker_config.lease_duration()),
    )
    .with_producer(producer)
    .with_events(worker.event_sender())
    .with_config(SweeperConfig::from_env());

    let handle = worker.start();
    tokio::spawn(log_worker_events(handle.events()));
    let sweeper_handle = sweeper.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, finishing in-flight jobs");

    if let Err(e) = sweeper_handle.shutdown().await {
        debug!(error = %e, "Sweeper already stopped");
    }
    if let Err(e) = handle.shutdown().await {
        debug!(error = %e, "Worker already stopped");
    }
    handle.join().await?;
    sweeper_handle.join().await?;

    info!("docqueue-worker stopped");
    Ok(())
}

/// Log worker events that are not already logged where they happen.
async fn log_worker_events(mut rx: broadcast::Receiver<WorkerEvent>) {
    loop {
        match rx.recv().await {
            Ok(WorkerEvent::JobProgress {
                job_id,
                stage,
                percent,
            }) => {
                debug!(job_id = %job_id, stage = %stage, progress = percent, "Job progress");
            }
            Ok(WorkerEvent::LeaseContended { job_id }) => {
                debug!(job_id = %job_id, "Lease held elsewhere");
            }
            Ok(WorkerEvent::StaleNotification { job_id, status }) => {
                debug!(job_id = %job_id, status = ?status, "Stale notification acknowledged");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Worker event logger lagged, skipped {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
