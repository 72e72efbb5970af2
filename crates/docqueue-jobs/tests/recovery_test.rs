//! Recovery tests: crashed workers, expired leases, lost notifications.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;

use common::{sample_document, TestEnv};
use docqueue_db::InMemoryNotificationChannel;
use docqueue_inference::MockEmbedder;
use docqueue_jobs::{
    defaults, AttemptOutcome, DeliveryMode, JobProducer, JobStatus, LeaseManager,
    RecoverySweeper, SweeperConfig, WorkerBuilder, WorkerConfig, WorkerEvent,
};

fn sweeper(env: &TestEnv) -> RecoverySweeper {
    RecoverySweeper::new(
        env.jobs.clone(),
        LeaseManager::new(env.jobs.clone(), Duration::from_secs(300)),
    )
}

#[tokio::test]
async fn test_crashed_worker_is_recovered_after_lease_expiry() {
    let env = TestEnv::new();
    let job = env.enqueue("report.txt", &sample_document()).await;

    // A worker acquires the job and dies without releasing.
    let leases = LeaseManager::new(env.jobs.clone(), Duration::from_secs(300));
    let lease = leases.acquire(job.id).await.unwrap();
    assert!(leases.report_progress(&lease, 25).await);

    // Before expiry the sweeper leaves it alone.
    let report = sweeper(&env).sweep_once().await.unwrap();
    assert_eq!(report.requeued, 0);
    assert_eq!(env.job(job.id).await.status, JobStatus::Processing);

    let report = sweeper(&env)
        .sweep_at(Utc::now() + chrono::Duration::minutes(6))
        .await
        .unwrap();
    assert_eq!(report.requeued, 1);

    let stored = env.job(job.id).await;
    assert_eq!(stored.status, JobStatus::Queued);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.progress, 0);
    assert!(stored.lease_expires_at.is_none());
    assert_eq!(
        stored.last_error.as_deref(),
        Some(defaults::LEASE_EXPIRED_ERROR)
    );

    // The dead worker's lease no longer counts.
    assert!(!leases.report_progress(&lease, 50).await);

    let worker = WorkerBuilder::new(env.jobs.clone(), env.handler(MockEmbedder::new()))
        .with_config(WorkerConfig::default().with_delivery_mode(DeliveryMode::Poll))
        .build();
    assert!(matches!(
        worker.process_job(job.id).await,
        AttemptOutcome::Completed { .. }
    ));
    assert_eq!(env.job(job.id).await.attempts, 2);
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let env = TestEnv::new();
    let job = env.enqueue("report.txt", "text").await;
    env.jobs
        .acquire(job.id, Duration::from_secs(300))
        .await
        .unwrap()
        .unwrap();
    env.repo
        .set_lease_expiry(job.id, Utc::now() - chrono::Duration::seconds(1));

    let sweeper = sweeper(&env);
    assert_eq!(sweeper.sweep_once().await.unwrap().requeued, 1);
    assert_eq!(sweeper.sweep_once().await.unwrap().requeued, 0);
    assert_eq!(env.job(job.id).await.attempts, 1);
}

#[tokio::test]
async fn test_expiry_on_last_attempt_fails_job() {
    let env = TestEnv::new();
    let job = env.enqueue("report.txt", "text").await;
    let leases = LeaseManager::new(env.jobs.clone(), Duration::from_secs(300));
    let sweeper = sweeper(&env);

    for attempt in 1..=3 {
        let lease = leases.acquire(job.id).await.unwrap();
        assert_eq!(lease.attempt, attempt);
        env.repo
            .set_lease_expiry(job.id, Utc::now() - chrono::Duration::seconds(1));
        sweeper.sweep_once().await.unwrap();
    }

    let stored = env.job(job.id).await;
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.attempts, 3);
    assert!(leases.acquire(job.id).await.is_none());
}

#[tokio::test]
async fn test_lost_notification_is_republished() {
    let env = TestEnv::new();
    let channel = InMemoryNotificationChannel::default();
    let producer = JobProducer::new(env.jobs.clone()).with_channel(Arc::new(channel.clone()));

    // Publish fails while the channel is down; the job stays unnotified.
    channel.set_unavailable(true);
    env.storage.insert("uploads/report.txt", sample_document());
    let job = producer
        .enqueue(docqueue_jobs::NewJob::new("uploads/report.txt", "report.txt"))
        .await
        .unwrap();
    channel.set_unavailable(false);
    assert_eq!(channel.pending(), 0);

    let (events_tx, mut events_rx) = broadcast::channel(16);
    let sweeper = sweeper(&env)
        .with_producer(producer)
        .with_events(events_tx);
    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(report.republished, 1);
    assert_eq!(channel.pending_job_ids(), vec![job.id]);
    assert_eq!(
        events_rx.recv().await.unwrap(),
        WorkerEvent::SweepCompleted {
            requeued: 0,
            failed: 0,
            republished: 1
        }
    );

    // Notified too long ago counts as lost again.
    let later = Utc::now() + chrono::Duration::minutes(11);
    assert_eq!(sweeper.sweep_at(later).await.unwrap().republished, 1);
    assert_eq!(channel.pending(), 2);
}

#[tokio::test]
async fn test_sweeper_loop_runs_at_startup() {
    let env = TestEnv::new();
    let job = env.enqueue("report.txt", "text").await;
    env.jobs
        .acquire(job.id, Duration::from_secs(300))
        .await
        .unwrap()
        .unwrap();
    env.repo
        .set_lease_expiry(job.id, Utc::now() - chrono::Duration::seconds(1));

    let handle = sweeper(&env)
        .with_config(SweeperConfig::default().with_interval(Duration::from_secs(3600)))
        .start();

    assert!(
        env.wait_for_status(job.id, JobStatus::Queued, Duration::from_secs(5))
            .await
    );

    handle.shutdown().await.unwrap();
    handle.join().await.unwrap();
}
