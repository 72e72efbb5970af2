//! OpenAI-specific error handling.

use docqueue_core::Error;

/// OpenAI-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    /// Invalid authentication credentials.
    AuthenticationError,
    /// Rate limit exceeded.
    RateLimitExceeded,
    /// Model not found or not available.
    ModelNotFound,
    /// Request too large.
    ContextLengthExceeded,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

impl OpenAIErrorCode {
    /// Determine error code from HTTP status and error type.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401, _) => Self::AuthenticationError,
            (429, _) => Self::RateLimitExceeded,
            (404, _) | (_, "model_not_found") => Self::ModelNotFound,
            (400, _) if error_type.contains("context_length") => Self::ContextLengthExceeded,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }
}

/// Convert an OpenAI error response into a docqueue Error.
///
/// Only rate limiting maps to a retryable error.
pub fn to_core_error(code: OpenAIErrorCode, message: &str) -> Error {
    match code {
        OpenAIErrorCode::AuthenticationError => {
            Error::Config(format!("Authentication failed: {}", message))
        }
        OpenAIErrorCode::RateLimitExceeded => Error::RateLimited(message.to_string()),
        OpenAIErrorCode::ModelNotFound => Error::Config(format!("Model not found: {}", message)),
        OpenAIErrorCode::ContextLengthExceeded => {
            Error::Embedding(format!("Context too long: {}", message))
        }
        OpenAIErrorCode::ServerError => Error::Embedding(format!("Server error: {}", message)),
        OpenAIErrorCode::Unknown => Error::Embedding(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_status() {
        assert_eq!(
            OpenAIErrorCode::from_response(401, "invalid_api_key"),
            OpenAIErrorCode::AuthenticationError
        );
        assert_eq!(
            OpenAIErrorCode::from_response(429, "rate_limit_exceeded"),
            OpenAIErrorCode::RateLimitExceeded
        );
        assert_eq!(
            OpenAIErrorCode::from_response(404, "model_not_found"),
            OpenAIErrorCode::ModelNotFound
        );
        assert_eq!(
            OpenAIErrorCode::from_response(400, "context_length_exceeded"),
            OpenAIErrorCode::ContextLengthExceeded
        );
        assert_eq!(
            OpenAIErrorCode::from_response(502, "bad_gateway"),
            OpenAIErrorCode::ServerError
        );
        assert_eq!(
            OpenAIErrorCode::from_response(418, "im_a_teapot"),
            OpenAIErrorCode::Unknown
        );
    }

    #[test]
    fn test_rate_limit_is_retryable() {
        let err = to_core_error(OpenAIErrorCode::RateLimitExceeded, "Too many requests");
        assert!(matches!(err, Error::RateLimited(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_server_error_is_not_retryable() {
        let err = to_core_error(OpenAIErrorCode::ServerError, "boom");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Server error"));
    }

    #[test]
    fn test_auth_error_is_config() {
        let err = to_core_error(OpenAIErrorCode::AuthenticationError, "Invalid key");
        assert!(matches!(err, Error::Config(_)));
    }
}
