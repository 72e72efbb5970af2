//! OpenAI-compatible embedding backend implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use docqueue_core::{defaults, EmbeddingBackend, Error, Result};

use super::error::{to_core_error, OpenAIErrorCode};
use super::types::*;

/// Default OpenAI API endpoint.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Configuration for the OpenAI-compatible embedder.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key for authentication (optional for local endpoints).
    pub api_key: Option<String>,
    /// Model to use for embeddings.
    pub embed_model: String,
    /// Expected embedding dimension.
    pub embed_dimension: usize,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_URL.to_string(),
            api_key: None,
            embed_model: defaults::EMBED_MODEL.to_string(),
            embed_dimension: defaults::EMBED_DIMENSION,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl OpenAIConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `OPENAI_BASE_URL` | `https://api.openai.com/v1` |
    /// | `OPENAI_API_KEY` | unset |
    /// | `OPENAI_EMBED_MODEL` | `text-embedding-3-small` |
    /// | `OPENAI_EMBED_DIM` | `1536` |
    /// | `OPENAI_TIMEOUT` | `120` |
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_URL.to_string()),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            embed_model: std::env::var("OPENAI_EMBED_MODEL")
                .unwrap_or_else(|_| defaults::EMBED_MODEL.to_string()),
            embed_dimension: std::env::var("OPENAI_EMBED_DIM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::EMBED_DIMENSION),
            timeout_seconds: std::env::var("OPENAI_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Embedding backend for any OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAIEmbedder {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIEmbedder {
    /// Create a new embedder with the given configuration.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "openai",
            base_url = %config.base_url,
            model = %config.embed_model,
            dimension = config.embed_dimension,
            "Initializing OpenAI embedder"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAIConfig::from_env())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req.header("Content-Type", "application/json")
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();
        let request = EmbeddingRequest {
            model: self.config.embed_model.clone(),
            input: texts.to_vec(),
            encoding_format: Some("float".to_string()),
        };

        let response = self
            .build_request("/embeddings")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body: OpenAIErrorResponse = response
                .json()
                .await
                .unwrap_or_else(|_| OpenAIErrorResponse::unknown());
            let code = OpenAIErrorCode::from_response(status.as_u16(), &body.error.error_type);
            return Err(to_core_error(
                code,
                &format!("OpenAI returned {}: {}", status, body.error.message),
            ));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        if result.data.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        // Sort by index to ensure correct ordering
        let mut data = result.data;
        data.sort_by_key(|d| d.index);

        let vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();

        debug!(
            subsystem = "inference",
            component = "openai",
            op = "embed_texts",
            input_count = texts.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Generated embeddings"
        );
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.config.embed_dimension
    }

    fn model_name(&self) -> &str {
        &self.config.embed_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OpenAIConfig::default();
        assert_eq!(config.base_url, DEFAULT_OPENAI_URL);
        assert_eq!(config.embed_model, defaults::EMBED_MODEL);
        assert_eq!(config.embed_dimension, defaults::EMBED_DIMENSION);
        assert_eq!(config.timeout_seconds, DEFAULT_TIMEOUT_SECS);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_accessors() {
        let config = OpenAIConfig {
            embed_model: "test-embed".to_string(),
            embed_dimension: 512,
            ..Default::default()
        };
        let backend = OpenAIEmbedder::new(config).unwrap();
        assert_eq!(backend.dimension(), 512);
        assert_eq!(backend.model_name(), "test-embed");
    }

    #[tokio::test]
    async fn test_empty_input_skips_request() {
        let config = OpenAIConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let backend = OpenAIEmbedder::new(config).unwrap();
        let vectors = backend.embed_texts(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }
}
