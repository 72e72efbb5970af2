//! Worker loop tests: notification delivery, polling fallback, lifecycle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use common::{drain_events, sample_document, TestEnv};
use docqueue_db::InMemoryNotificationChannel;
use docqueue_inference::MockEmbedder;
use docqueue_jobs::{
    DeliveryMode, JobProducer, JobSource, JobStatus, NotificationChannel, NotificationSource,
    PollingSource, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle,
};

const WAIT: Duration = Duration::from_secs(5);

/// Notification source with short waits for tests.
fn notify_source(env: &TestEnv, channel: &InMemoryNotificationChannel) -> Arc<dyn JobSource> {
    Arc::new(
        NotificationSource::new(
            Arc::new(channel.clone()),
            env.jobs.clone(),
            PollingSource::new(env.jobs.clone(), Duration::from_millis(20)),
        )
        .with_receive_limits(4, Duration::from_millis(50))
        .with_idle_delay(Duration::from_millis(10)),
    )
}

fn start_notify_worker(env: &TestEnv, channel: &InMemoryNotificationChannel) -> WorkerHandle {
    WorkerBuilder::new(env.jobs.clone(), env.handler(MockEmbedder::new()))
        .with_config(WorkerConfig::default().with_delivery_mode(DeliveryMode::Notify))
        .with_channel(Arc::new(channel.clone()))
        .with_source(notify_source(env, channel))
        .build()
        .start()
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_notified_job_is_processed_and_acked() {
    let env = TestEnv::new();
    let channel = InMemoryNotificationChannel::default();
    let producer = JobProducer::new(env.jobs.clone()).with_channel(Arc::new(channel.clone()));

    let handle = start_notify_worker(&env, &channel);
    let mut events = handle.events();

    env.storage.insert("uploads/report.txt", sample_document());
    let job = producer
        .enqueue(docqueue_jobs::NewJob::new("uploads/report.txt", "report.txt"))
        .await
        .unwrap();

    assert!(env.wait_for_status(job.id, JobStatus::Completed, WAIT).await);
    assert!(wait_until(|| channel.pending() == 0).await);

    handle.shutdown().await.unwrap();
    let received = drain_events(&mut events);
    assert!(received.contains(&WorkerEvent::JobStarted {
        job_id: job.id,
        attempt: 1
    }));
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_notification_is_ignored() {
    let env = TestEnv::new();
    let channel = InMemoryNotificationChannel::default();
    let job = env.enqueue("report.txt", &sample_document()).await;
    channel.publish(job.id).await.unwrap();

    let handle = start_notify_worker(&env, &channel);
    let mut events = handle.events();
    assert!(env.wait_for_status(job.id, JobStatus::Completed, WAIT).await);
    assert!(wait_until(|| channel.pending() == 0).await);

    // A late duplicate for a terminal job is acknowledged without an attempt.
    channel.publish(job.id).await.unwrap();
    assert!(wait_until(|| channel.pending() == 0).await);

    handle.shutdown().await.unwrap();
    handle.join().await.unwrap();

    let received = drain_events(&mut events);
    assert!(received.contains(&WorkerEvent::StaleNotification {
        job_id: job.id,
        status: Some(JobStatus::Completed),
    }));
    let starts = received
        .iter()
        .filter(|e| matches!(e, WorkerEvent::JobStarted { .. }))
        .count();
    assert_eq!(starts, 1);

    let stored = env.job(job.id).await;
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_channel_outage_falls_back_to_polling() {
    let env = TestEnv::new();
    let channel = InMemoryNotificationChannel::default();
    channel.set_unavailable(true);

    // Enqueued without a notification; only polling can find it.
    let job = env.enqueue("report.txt", &sample_document()).await;
    let handle = start_notify_worker(&env, &channel);

    assert!(env.wait_for_status(job.id, JobStatus::Completed, WAIT).await);

    handle.shutdown().await.unwrap();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_failed_attempt_is_redelivered() {
    let env = TestEnv::new();
    let channel = InMemoryNotificationChannel::default();
    // Nothing stored at this path: every attempt fails until the budget is gone.
    let job = env
        .jobs
        .create(docqueue_jobs::NewJob::new("uploads/missing.txt", "missing.txt"))
        .await
        .unwrap();
    channel.publish(job.id).await.unwrap();

    let handle = start_notify_worker(&env, &channel);
    assert!(env.wait_for_status(job.id, JobStatus::Failed, WAIT).await);
    assert!(wait_until(|| channel.pending() == 0).await);

    handle.shutdown().await.unwrap();
    handle.join().await.unwrap();

    let stored = env.job(job.id).await;
    assert_eq!(stored.attempts, 3);
    assert!(stored.last_error.unwrap().contains("missing.txt"));
}

#[tokio::test]
async fn test_polling_worker_lifecycle() {
    let env = TestEnv::new();
    let mut jobs = Vec::new();
    for i in 0..6 {
        jobs.push(env.enqueue(&format!("doc-{i}.md"), &sample_document()).await);
    }

    let worker = WorkerBuilder::new(env.jobs.clone(), env.handler(MockEmbedder::new()))
        .with_config(
            WorkerConfig::default()
                .with_delivery_mode(DeliveryMode::Poll)
                .with_poll_interval(20)
                .with_max_concurrent(2),
        )
        .build();
    assert_eq!(worker.source_name(), "poll");
    let mut events = worker.events();
    let handle = worker.start();

    for job in &jobs {
        assert!(env.wait_for_status(job.id, JobStatus::Completed, WAIT).await);
    }

    handle.shutdown().await.unwrap();
    handle.join().await.unwrap();

    let received = drain_events(&mut events);
    assert_eq!(received.first(), Some(&WorkerEvent::WorkerStarted));
    assert_eq!(received.last(), Some(&WorkerEvent::WorkerStopped));
    let completed = received
        .iter()
        .filter(|e| matches!(e, WorkerEvent::JobCompleted { .. }))
        .count();
    assert_eq!(completed, jobs.len());
}

#[tokio::test]
async fn test_disabled_worker_exits_immediately() {
    let env = TestEnv::new();
    let job = env.enqueue("report.txt", "text").await;

    let handle = WorkerBuilder::new(env.jobs.clone(), env.handler(MockEmbedder::new()))
        .with_config(WorkerConfig::default().with_enabled(false))
        .build()
        .start();
    handle.join().await.unwrap();

    assert_eq!(env.job(job.id).await.status, JobStatus::Queued);
}
