//! HTTP-level tests for the OpenAI-compatible embedder.

use docqueue_core::{EmbeddingBackend, Error};
use docqueue_inference::openai::{OpenAIConfig, OpenAIEmbedder};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn embedder(server: &MockServer) -> OpenAIEmbedder {
    let config = OpenAIConfig {
        base_url: server.uri(),
        api_key: Some("test-key".to_string()),
        embed_model: "test-embed".to_string(),
        embed_dimension: 3,
        timeout_seconds: 10,
    };
    OpenAIEmbedder::new(config).expect("Failed to create embedder")
}

#[tokio::test]
async fn test_embeddings_are_returned_in_input_order() {
    let mock_server = MockServer::start().await;

    let body = serde_json::json!({
        "data": [
            {"embedding": [0.0, 1.0, 0.0], "index": 1},
            {"embedding": [1.0, 0.0, 0.0], "index": 0}
        ],
        "model": "test-embed",
        "usage": {"prompt_tokens": 2, "total_tokens": 2}
    });

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let texts = vec!["first".to_string(), "second".to_string()];
    let vectors = embedder(&mock_server).embed_texts(&texts).await.unwrap();

    assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
}

#[tokio::test]
async fn test_rate_limit_maps_to_retryable_error() {
    let mock_server = MockServer::start().await;

    let body = serde_json::json!({
        "error": {"message": "slow down", "type": "rate_limit_exceeded", "code": null}
    });

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_json(&body))
        .mount(&mock_server)
        .await;

    let err = embedder(&mock_server)
        .embed_texts(&["x".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RateLimited(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_not_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .mount(&mock_server)
        .await;

    let err = embedder(&mock_server)
        .embed_texts(&["x".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Embedding(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_count_mismatch_is_rejected() {
    let mock_server = MockServer::start().await;

    let body = serde_json::json!({
        "data": [{"embedding": [1.0, 0.0, 0.0], "index": 0}]
    });

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&mock_server)
        .await;

    let texts = vec!["a".to_string(), "b".to_string()];
    let err = embedder(&mock_server).embed_texts(&texts).await.unwrap_err();
    assert!(err.to_string().contains("Expected 2 embeddings"));
}
