//! Error types for rate limiting operations.

use thiserror::Error;

/// Main error type for sharedlimit operations.
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// A request field failed validation. Raised before any store access.
    #[error("Invalid argument `{field}`: {reason}")]
    InvalidArgument {
        /// Name of the offending request field
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// The shared store could not be reached or rejected the operation
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The shared store did not answer in time
    #[error("Store timeout: {0}")]
    StoreTimeout(String),

    /// The atomic evaluation returned output that does not match the reply format
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RateLimitError {
    /// Build an `InvalidArgument` error for the given field.
    pub fn invalid_argument(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    /// Whether the failure came from the store and a caller-side retry may succeed.
    ///
    /// The limiter itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::StoreTimeout(_))
    }
}

impl From<redis::RedisError> for RateLimitError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            Self::StoreTimeout(err.to_string())
        } else {
            Self::StoreUnavailable(err.to_string())
        }
    }
}

/// Result type alias for sharedlimit operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_names_field() {
        let err = RateLimitError::invalid_argument("capacity", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "Invalid argument `capacity`: must be greater than zero"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_store_errors_are_retryable() {
        assert!(RateLimitError::StoreUnavailable("down".into()).is_retryable());
        assert!(RateLimitError::StoreTimeout("slow".into()).is_retryable());
        assert!(!RateLimitError::Protocol("bad".into()).is_retryable());
    }

    #[test]
    fn test_redis_io_error_maps_to_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: RateLimitError = redis::RedisError::from(io).into();
        assert!(matches!(err, RateLimitError::StoreUnavailable(_)));
    }

    #[test]
    fn test_redis_timeout_maps_to_timeout() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err: RateLimitError = redis::RedisError::from(io).into();
        assert!(matches!(err, RateLimitError::StoreTimeout(_)));
    }
}
