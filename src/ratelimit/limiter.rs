//! Rate limiter façade.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::key::{StorageKeys, DEFAULT_CATEGORY};
use super::protocol::ScriptReply;
use super::request::{
    FixedWindowRequest, FixedWindowResult, LimitRequest, ThrottleRequest, ThrottleResult,
};
use crate::error::Result;
use crate::store::SharedStore;

/// Answers "is this one request allowed right now for this key".
///
/// The limiter holds no state of its own: every decision is a single atomic
/// evaluation against the shared store, timed by the store's clock inside that
/// same evaluation. Any number of limiters, on any number of machines, can
/// share one store.
pub struct RateLimiter<S: SharedStore + ?Sized> {
    /// The store arbitrating every decision
    store: Arc<S>,
    /// First segment of every storage key
    category: String,
}

impl<S: SharedStore + ?Sized> RateLimiter<S> {
    /// Create a rate limiter using the default key category.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_category(store, DEFAULT_CATEGORY)
    }

    /// Create a rate limiter whose storage keys start with `category`.
    pub fn with_category(store: Arc<S>, category: impl Into<String>) -> Self {
        Self {
            store,
            category: category.into(),
        }
    }

    /// The key category in use.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Get the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Decide one request.
    ///
    /// Every call, allowed or denied, updates the persisted state for the key.
    /// Invalid requests fail before the store is touched; store and protocol
    /// failures are returned as-is, never retried.
    pub async fn validate<R: LimitRequest>(&self, request: &R) -> Result<R::Outcome> {
        request.validate()?;

        let keys = StorageKeys::new(&self.category, R::KIND, request.key());
        let args = request.script_args()?;

        trace!(
            key = %request.key(),
            algorithm = %R::KIND,
            args = ?args,
            "Checking rate limit"
        );

        let raw = self
            .store
            .evaluate(R::script(), &keys.to_vec(), &args)
            .await?;
        let reply = ScriptReply::parse(&raw).map_err(|e| {
            warn!(
                key = %request.key(),
                algorithm = %R::KIND,
                error = %e,
                "Unexpected script reply"
            );
            e
        })?;

        if !reply.allowed {
            debug!(
                key = %request.key(),
                algorithm = %R::KIND,
                wait_secs = reply.wait_seconds(),
                "Rate limit exceeded"
            );
        }

        Ok(R::outcome(reply))
    }

    /// Decide a request with the fixed window algorithm.
    pub async fn validate_fixed_window(
        &self,
        request: &FixedWindowRequest,
    ) -> Result<FixedWindowResult> {
        self.validate(request).await
    }

    /// Decide a request with the token bucket algorithm.
    pub async fn validate_throttle(&self, request: &ThrottleRequest) -> Result<ThrottleResult> {
        self.validate(request).await
    }
}
