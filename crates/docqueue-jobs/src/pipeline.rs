//! Document pipeline: download, extract, chunk, embed, index.
//!
//! Each stage runs under its own timeout. A stage that overruns fails the
//! attempt and its late result is dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use docqueue_core::{
    defaults, retry_with_backoff, Chunker, ChunkerConfig, ChunkIndex, DocumentStorage,
    EmbeddingBackend, Error, IndexedChunk, Result, RetryPolicy, SlidingWindowChunker, Stage,
    TextChunk, TextExtractor,
};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Per-stage time budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub download: Duration,
    pub extract: Duration,
    pub chunk: Duration,
    pub embed: Duration,
    pub index: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            download: Duration::from_secs(defaults::STAGE_TIMEOUT_DOWNLOAD_SECS),
            extract: Duration::from_secs(defaults::STAGE_TIMEOUT_EXTRACT_SECS),
            chunk: Duration::from_secs(defaults::STAGE_TIMEOUT_CHUNK_SECS),
            embed: Duration::from_secs(defaults::STAGE_TIMEOUT_EMBED_SECS),
            index: Duration::from_secs(defaults::STAGE_TIMEOUT_INDEX_SECS),
        }
    }
}

impl StageTimeouts {
    /// Load stage timeouts from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `STAGE_TIMEOUT_DOWNLOAD_SECS` | `60` |
    /// | `STAGE_TIMEOUT_EXTRACT_SECS` | `600` |
    /// | `STAGE_TIMEOUT_CHUNK_SECS` | `30` |
    /// | `STAGE_TIMEOUT_EMBED_SECS` | `180` |
    /// | `STAGE_TIMEOUT_INDEX_SECS` | `60` |
    pub fn from_env() -> Self {
        fn secs(var: &str, default: Duration) -> Duration {
            std::env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|&v| v > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            download: secs("STAGE_TIMEOUT_DOWNLOAD_SECS", defaults.download),
            extract: secs("STAGE_TIMEOUT_EXTRACT_SECS", defaults.extract),
            chunk: secs("STAGE_TIMEOUT_CHUNK_SECS", defaults.chunk),
            embed: secs("STAGE_TIMEOUT_EMBED_SECS", defaults.embed),
            index: secs("STAGE_TIMEOUT_INDEX_SECS", defaults.index),
        }
    }

    /// Same budget for every stage.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            download: timeout,
            extract: timeout,
            chunk: timeout,
            embed: timeout,
            index: timeout,
        }
    }

    pub fn with_stage(mut self, stage: Stage, timeout: Duration) -> Self {
        match stage {
            Stage::Downloading => self.download = timeout,
            Stage::Extracting => self.extract = timeout,
            Stage::Chunking => self.chunk = timeout,
            Stage::Embedding => self.embed = timeout,
            Stage::Indexing => self.index = timeout,
            Stage::Done => {}
        }
        self
    }

    pub fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Downloading => self.download,
            Stage::Extracting => self.extract,
            Stage::Chunking => self.chunk,
            Stage::Embedding => self.embed,
            Stage::Indexing | Stage::Done => self.index,
        }
    }
}

/// Handler that drives a document through every pipeline stage.
pub struct DocumentPipeline {
    storage: Arc<dyn DocumentStorage>,
    extractor: Arc<dyn TextExtractor>,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn EmbeddingBackend>,
    index: Arc<dyn ChunkIndex>,
    timeouts: StageTimeouts,
    retry: RetryPolicy,
    embed_batch_size: usize,
}

impl DocumentPipeline {
    /// Create a pipeline with the default chunker, timeouts, and retry policy.
    pub fn new(
        storage: Arc<dyn DocumentStorage>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn EmbeddingBackend>,
        index: Arc<dyn ChunkIndex>,
    ) -> Self {
        Self {
            storage,
            extractor,
            chunker: Arc::new(SlidingWindowChunker::new(ChunkerConfig::default())),
            embedder,
            index,
            timeouts: StageTimeouts::default(),
            retry: RetryPolicy::default(),
            embed_batch_size: defaults::EMBED_BATCH_SIZE,
        }
    }

    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_embed_batch_size(mut self, size: usize) -> Self {
        self.embed_batch_size = size.max(1);
        self
    }

    pub fn timeouts(&self) -> &StageTimeouts {
        &self.timeouts
    }

    /// Run every stage for the job in `ctx`, returning the indexed chunk count.
    pub async fn run(&self, ctx: &JobContext) -> Result<i32> {
        let job = &ctx.job;

        ctx.report_progress(Stage::Downloading).await;
        let data = self
            .stage(job.id, Stage::Downloading, self.storage.fetch(&job.source_path))
            .await?;

        ctx.report_progress(Stage::Extracting).await;
        let extracted = self
            .stage(
                job.id,
                Stage::Extracting,
                self.extractor.extract(&data, &job.filename),
            )
            .await?;
        drop(data);
        if extracted.is_blank() {
            return Err(Error::EmptyExtraction);
        }

        ctx.report_progress(Stage::Chunking).await;
        let chunker = self.chunker.clone();
        let chunks = self
            .stage(job.id, Stage::Chunking, async move {
                tokio::task::spawn_blocking(move || chunker.chunk(&extracted))
                    .await
                    .map_err(|e| Error::Internal(format!("chunking task failed: {e}")))
            })
            .await?;
        if chunks.is_empty() {
            return Err(Error::EmptyExtraction);
        }

        ctx.report_progress(Stage::Embedding).await;
        let vectors = self
            .stage(job.id, Stage::Embedding, self.embed_chunks(&chunks))
            .await?;

        ctx.report_progress(Stage::Indexing).await;
        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedChunk { chunk, vector })
            .collect();
        self.stage(job.id, Stage::Indexing, self.index_chunks(job.id, &indexed))
            .await?;

        i32::try_from(indexed.len())
            .map_err(|_| Error::Index(format!("chunk count {} out of range", indexed.len())))
    }

    async fn stage<T, F>(&self, job_id: Uuid, stage: Stage, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = self.timeouts.for_stage(stage);
        let start = Instant::now();
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => {
                debug!(
                    subsystem = "jobs",
                    component = "pipeline",
                    job_id = %job_id,
                    stage = %stage,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Stage complete"
                );
                Ok(value)
            }
            Ok(Err(e)) => {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    job_id = %job_id,
                    stage = %stage,
                    duration_ms = start.elapsed().as_millis() as u64,
                    error = %e,
                    "Stage failed"
                );
                Err(e)
            }
            Err(_) => {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    job_id = %job_id,
                    stage = %stage,
                    timeout_ms = limit.as_millis() as u64,
                    "Stage timed out"
                );
                Err(Error::Timeout(format!("{stage} exceeded {limit:?}")))
            }
        }
    }

    /// Embed chunks in fixed-size batches, retrying rate limits per batch.
    async fn embed_chunks(&self, chunks: &[TextChunk]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.embed_batch_size) {
            let inputs: Vec<String> = batch
                .iter()
                .map(|c| truncate_chars(&c.text, defaults::EMBED_MAX_INPUT_CHARS))
                .collect();
            let embedder = &self.embedder;
            let inputs = &inputs;
            let batch_vectors =
                retry_with_backoff(&self.retry, "embed_batch", || embedder.embed_texts(inputs))
                    .await?;
            if batch_vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    batch_vectors.len()
                )));
            }
            vectors.extend(batch_vectors);
        }
        Ok(vectors)
    }

    /// Replace whatever a previous attempt indexed for this job.
    async fn index_chunks(&self, job_id: Uuid, chunks: &[IndexedChunk]) -> Result<()> {
        let removed = self.index.delete_by_job(job_id).await?;
        if removed > 0 {
            debug!(
                subsystem = "jobs",
                component = "pipeline",
                job_id = %job_id,
                removed,
                "Removed chunks from earlier attempt"
            );
        }
        self.index.upsert(job_id, chunks).await
    }
}

#[async_trait]
impl JobHandler for DocumentPipeline {
    fn name(&self) -> &str {
        "document_pipeline"
    }

    async fn execute(&self, ctx: &JobContext) -> JobResult {
        let start = Instant::now();
        match self.run(ctx).await {
            Ok(chunk_count) => {
                info!(
                    subsystem = "jobs",
                    component = "pipeline",
                    job_id = %ctx.job_id(),
                    attempt = ctx.attempt(),
                    chunk_count,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Document processed"
                );
                JobResult::Success { chunk_count }
            }
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
