//! Sharedlimit - store-arbitrated rate limiting
//!
//! This crate decides whether a single request is allowed right now for a
//! given key, using either a fixed window counter or a token bucket. Every
//! decision is one atomic evaluation against a shared, strongly-ordered store,
//! timed by the store's own clock, so any number of service instances can
//! enforce one limit without sharing memory or trusting their local clocks.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use clock::{SharedClock, Ticks, TICKS_PER_SECOND};
pub use error::{RateLimitError, Result};
pub use ratelimit::{
    FixedWindowRequest, FixedWindowResult, RateLimiter, ThrottleRequest, ThrottleResult,
};
pub use store::{InMemoryStore, RedisStore, SharedStore};
