//! # docqueue-inference
//!
//! Embedding backends for the docqueue pipeline.
//!
//! This crate provides:
//! - An OpenAI-compatible embeddings client (`openai`)
//! - A deterministic mock backend (feature `mock`, always on in tests)
//!
//! # Example
//!
//! ```rust,no_run
//! use docqueue_core::EmbeddingBackend;
//! use docqueue_inference::openai::OpenAIEmbedder;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIEmbedder::from_env().unwrap();
//!     let texts = vec!["Hello".to_string()];
//!     let vectors = backend.embed_texts(&texts).await.unwrap();
//!     assert_eq!(vectors.len(), 1);
//! }
//! ```

pub mod openai;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use openai::{OpenAIConfig, OpenAIEmbedder};

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockEmbedder, MockEmbeddingGenerator};
