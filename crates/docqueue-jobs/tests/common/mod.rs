//! Shared fixtures for docqueue-jobs integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::sleep;
use uuid::Uuid;

use docqueue_db::{InMemoryChunkIndex, InMemoryJobRepository};
use docqueue_inference::MockEmbedder;
use docqueue_jobs::{
    DocumentPipeline, DocumentStorage, Error, Job, JobHandler, JobRepository, JobStatus, NewJob,
    PlainTextExtractor, Result, RetryPolicy, StageTimeouts, WorkerEvent,
};

/// Document text long enough to produce several chunks.
pub fn sample_document() -> String {
    (0..40)
        .map(|i| format!("Paragraph {i} describes the quarterly report in some detail."))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Storage backed by a map, with an optional fetch delay.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
    delay: Mutex<Duration>,
}

impl MemoryStorage {
    pub fn insert(&self, path: &str, data: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(path.to_string(), data.into());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl DocumentStorage for MemoryStorage {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }
}

/// In-memory collaborators wired for one test.
pub struct TestEnv {
    pub repo: InMemoryJobRepository,
    pub jobs: Arc<dyn JobRepository>,
    pub index: InMemoryChunkIndex,
    pub storage: Arc<MemoryStorage>,
}

impl TestEnv {
    pub fn new() -> Self {
        let repo = InMemoryJobRepository::new();
        Self {
            jobs: Arc::new(repo.clone()),
            repo,
            index: InMemoryChunkIndex::new(),
            storage: Arc::new(MemoryStorage::default()),
        }
    }

    /// Store `contents` and create a queued job for it.
    pub async fn enqueue(&self, filename: &str, contents: &str) -> Job {
        let path = format!("uploads/{filename}");
        self.storage.insert(&path, contents.as_bytes());
        self.jobs
            .create(NewJob::new(path, filename))
            .await
            .expect("Failed to create test job")
    }

    pub fn pipeline(&self, embedder: MockEmbedder) -> DocumentPipeline {
        DocumentPipeline::new(
            self.storage.clone(),
            Arc::new(PlainTextExtractor),
            Arc::new(embedder),
            Arc::new(self.index.clone()),
        )
        .with_timeouts(StageTimeouts::uniform(Duration::from_secs(5)))
        .with_retry_policy(fast_retry())
    }

    pub fn handler(&self, embedder: MockEmbedder) -> Arc<dyn JobHandler> {
        Arc::new(self.pipeline(embedder))
    }

    pub async fn job(&self, job_id: Uuid) -> Job {
        self.jobs
            .get(job_id)
            .await
            .expect("job lookup failed")
            .expect("job missing")
    }

    /// Wait for a job to reach `expected`, up to `timeout`.
    pub async fn wait_for_status(&self, job_id: Uuid, expected: JobStatus, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if let Ok(Some(job)) = self.jobs.get(job_id).await {
                if job.status == expected {
                    return true;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_max_retries(3)
        .with_initial_backoff(Duration::from_millis(5))
        .with_max_backoff(Duration::from_millis(20))
        .with_jitter(false)
}

/// Drain events currently buffered on `rx`.
pub fn drain_events(rx: &mut broadcast::Receiver<WorkerEvent>) -> Vec<WorkerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
