//! Storage key derivation.

use std::fmt;

use crate::error::{RateLimitError, Result};

/// Category every storage key starts with unless configured otherwise.
pub const DEFAULT_CATEGORY: &str = "ratelimit";

/// The algorithm a request is evaluated with. Part of the storage namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmKind {
    /// Fixed window counter
    FixedWindow,
    /// Token bucket
    Throttle,
}

impl AlgorithmKind {
    /// Namespace segment used in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::FixedWindow => "fixed",
            AlgorithmKind::Throttle => "throttle",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a caller-supplied rate limit key: non-empty, no whitespace anywhere.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(RateLimitError::invalid_argument(
            "key",
            "identifier must be specified",
        ));
    }
    if key.contains(char::is_whitespace) {
        return Err(RateLimitError::invalid_argument(
            "key",
            "identifier must not contain whitespace",
        ));
    }
    Ok(())
}

/// The pair of store keys holding one limiter's state.
///
/// Format: `{category}:{kind}:{key}:count` and `{category}:{kind}:{key}:ticks`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKeys {
    /// Running counter (request count or token level)
    pub counter: String,
    /// Last update timestamp in ticks (window start or last refill)
    pub timestamp: String,
}

impl StorageKeys {
    /// Derive the storage keys for a request key under an algorithm.
    pub fn new(category: &str, kind: AlgorithmKind, key: &str) -> Self {
        let prefix = format!("{}:{}:{}", category, kind, key);
        Self {
            counter: format!("{}:count", prefix),
            timestamp: format!("{}:ticks", prefix),
        }
    }

    /// Keys in the order scripts expect them: counter, then timestamp.
    pub fn to_vec(&self) -> Vec<String> {
        vec![self.counter.clone(), self.timestamp.clone()]
    }
}
