//! Error types for the invalidation bus

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InvalidationError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// A subscriber callback could not apply the invalidation
    #[error("Callback execution failed: {0}")]
    CallbackFailed(String),

    /// Local bus has no live receivers or was shut down
    #[error("Bus closed: {0}")]
    Closed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InvalidationError::InvalidMessage("missing id".to_string());
        assert_eq!(err.to_string(), "Invalid message format: missing id");

        let err = InvalidationError::Closed("no receivers".to_string());
        assert_eq!(err.to_string(), "Bus closed: no receivers");
    }

    #[test]
    fn test_error_from_serde() {
        let json_err = serde_json::from_str::<String>("{").unwrap_err();
        let err: InvalidationError = json_err.into();
        assert!(matches!(err, InvalidationError::Serialization(_)));
    }
}
