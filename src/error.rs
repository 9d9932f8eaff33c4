//! Error types for the query cache
//!
//! Cache bookkeeping itself never fails. The types here cover configuration
//! problems, payload compaction, and failures of the upstream fetch functions
//! that the cache wraps.

use thiserror::Error;

/// Main error type for cache configuration and fetch plumbing
#[derive(Error, Debug)]
pub enum CacheError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Payload compaction error
    #[error("Compression error: {0}")]
    CompressionError(String),

    /// Upstream fetch failed
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}

/// Failure of an upstream fetch function
///
/// The variant decides whether the retry wrapper tries again: transient
/// transport and server failures are retryable, malformed input is not.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport-level failure (connection reset, DNS, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// The data backend answered with an error status
    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// The fetch did not complete in time
    #[error("Fetch timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },

    /// An identifier did not have the expected format
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout { .. } => true,
            FetchError::Upstream { status, .. } => *status >= 500 || *status == 429,
            FetchError::InvalidIdentifier(_) | FetchError::Decode(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CacheError::ConfigError("max_entries must be greater than 0".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: max_entries must be greater than 0"
        );

        let timeout = FetchError::Timeout {
            timeout_ms: 5000,
            context: "suppliers page 2".to_string(),
        };
        assert!(timeout.to_string().contains("timed out after 5000ms"));

        let wrapped: CacheError = FetchError::Network("reset".to_string()).into();
        assert!(wrapped.to_string().contains("Network error: reset"));
    }

    #[test]
    fn test_error_conversion() {
        let error: CacheError = "test error".into();
        assert!(matches!(error, CacheError::Other(_)));

        let error: CacheError = "test error".to_string().into();
        assert!(matches!(error, CacheError::Other(_)));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::Network("down".into()).is_retryable());
        assert!(FetchError::Timeout {
            timeout_ms: 10,
            context: String::new()
        }
        .is_retryable());
        assert!(FetchError::Upstream {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(FetchError::Upstream {
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());

        assert!(!FetchError::Upstream {
            status: 404,
            message: "missing".into()
        }
        .is_retryable());
        assert!(!FetchError::InvalidIdentifier("abc".into()).is_retryable());
        assert!(!FetchError::Decode("bad json".into()).is_retryable());
    }
}
