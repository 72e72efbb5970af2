//! Mock embedding backend for deterministic testing.
//!
//! Generates embeddings from text content so the same input always yields
//! the same vector, records every batch it receives, and can inject rate
//! limits, hard failures, or latency.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docqueue_core::EmbeddingBackend;
//! use docqueue_inference::mock::MockEmbedder;
//!
//! let backend = MockEmbedder::new().with_dimension(8).rate_limit_times(1);
//!
//! assert!(backend.embed_texts(&["a".to_string()]).await.is_err());
//! let vectors = backend.embed_texts(&["a".to_string()]).await.unwrap();
//! assert_eq!(vectors[0].len(), 8);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use docqueue_core::{EmbeddingBackend, Error, Result};

/// Mock embedding backend for testing.
#[derive(Clone)]
pub struct MockEmbedder {
    config: Arc<MockConfig>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    rate_limits_remaining: Arc<AtomicUsize>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    dimension: usize,
    latency: Duration,
    failure: Option<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            latency: Duration::ZERO,
            failure: None,
        }
    }
}

impl MockEmbedder {
    /// Create a new mock backend with default configuration.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            calls: Arc::new(Mutex::new(Vec::new())),
            rate_limits_remaining: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        Arc::make_mut(&mut self.config).dimension = dimension;
        self
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.config).latency = latency;
        self
    }

    /// Fail every call with a non-retryable embedding error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).failure = Some(message.into());
        self
    }

    /// Answer the next `n` calls with a rate-limit error.
    pub fn rate_limit_times(self, n: usize) -> Self {
        self.rate_limits_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Every batch received so far, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of embed calls made.
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear()
    }

    fn take_rate_limit(&self) -> bool {
        self.rate_limits_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(texts.to_vec());

        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        if self.take_rate_limit() {
            return Err(Error::RateLimited("mock rate limit".to_string()));
        }

        if let Some(ref message) = self.config.failure {
            return Err(Error::Embedding(message.clone()));
        }

        Ok(texts
            .iter()
            .map(|t| MockEmbeddingGenerator::generate(t, self.config.dimension))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

/// Mock embedding generator with deterministic output.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Generate a deterministic unit vector from text.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension];
        if dimension == 0 {
            return vec;
        }

        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % dimension;
            vec[idx] += 0.1;
        }

        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vec.iter_mut().for_each(|x| *x /= magnitude);
        }
        vec
    }
}
