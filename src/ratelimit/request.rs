//! Request and result types for both algorithms.

use serde::{Deserialize, Serialize};

use super::key::AlgorithmKind;
use super::protocol::ScriptReply;
use crate::error::{RateLimitError, Result};
use crate::store::AtomicScript;

/// Allow `capacity` requests per `window_size` seconds for `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowRequest {
    /// Entity being limited (user, client, route)
    pub key: String,
    /// Requests allowed per window
    pub capacity: i64,
    /// Window length in seconds
    pub window_size: i64,
}

impl FixedWindowRequest {
    /// Create a new fixed window request.
    pub fn new(key: impl Into<String>, capacity: i64, window_size: i64) -> Self {
        Self {
            key: key.into(),
            capacity,
            window_size,
        }
    }
}

/// Decision for a fixed window request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedWindowResult {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Seconds until the window resets; 0 when allowed
    pub reset_after: f64,
}

/// Token bucket holding up to `capacity` tokens, refilled at `refill_rate` tokens per second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleRequest {
    /// Entity being limited (user, client, route)
    pub key: String,
    /// Bucket size, i.e. the burst ceiling
    pub capacity: i64,
    /// Tokens added per whole elapsed second
    pub refill_rate: i64,
}

impl ThrottleRequest {
    /// Create a new throttle request.
    pub fn new(key: impl Into<String>, capacity: i64, refill_rate: i64) -> Self {
        Self {
            key: key.into(),
            capacity,
            refill_rate,
        }
    }
}

/// Decision for a throttle request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrottleResult {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Seconds until the next token refill; 0 when allowed
    pub retry_after: f64,
}

/// A request one of the algorithms can decide.
///
/// Implemented by each algorithm's request type; the limiter dispatches on it.
pub trait LimitRequest: Send + Sync {
    /// Typed decision returned to the caller.
    type Outcome: Send;

    /// Algorithm namespace for storage keys.
    const KIND: AlgorithmKind;

    /// The caller-supplied key.
    fn key(&self) -> &str;

    /// Check every field. Runs before any store access.
    fn validate(&self) -> Result<()>;

    /// The atomic transition implementing the algorithm.
    fn script() -> &'static AtomicScript;

    /// Script arguments: window or refill parameter, then capacity.
    ///
    /// The current time is not an argument; the store supplies it inside the
    /// atomic evaluation.
    fn script_args(&self) -> Result<Vec<String>>;

    /// Convert a script reply into the typed decision.
    fn outcome(reply: ScriptReply) -> Self::Outcome;
}

/// Fail with `InvalidArgument` unless `value > 0`.
pub(crate) fn ensure_positive(field: &'static str, value: i64) -> Result<()> {
    if value <= 0 {
        Err(RateLimitError::invalid_argument(
            field,
            "must be greater than zero",
        ))
    } else {
        Ok(())
    }
}
