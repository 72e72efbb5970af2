//! OpenAI-compatible embedding backend.
//!
//! Works with any endpoint that serves `POST /embeddings` in the OpenAI
//! shape: OpenAI itself, Azure OpenAI, Ollama in compatibility mode, vLLM,
//! LocalAI.
//!
//! # Example
//!
//! ```rust,no_run
//! use docqueue_core::EmbeddingBackend;
//! use docqueue_inference::openai::{OpenAIConfig, OpenAIEmbedder};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = OpenAIConfig {
//!         base_url: "http://localhost:11434/v1".to_string(), // Ollama
//!         api_key: None,
//!         embed_model: "nomic-embed-text".to_string(),
//!         embed_dimension: 768,
//!         timeout_seconds: 120,
//!     };
//!     let backend = OpenAIEmbedder::new(config).unwrap();
//!     let vectors = backend.embed_texts(&["Hello".to_string()]).await.unwrap();
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{
    OpenAIConfig, OpenAIEmbedder, DEFAULT_OPENAI_URL, DEFAULT_TIMEOUT_SECS,
};
pub use error::{to_core_error, OpenAIErrorCode};
pub use types::*;
