//! Rate limiting algorithms and the façade that dispatches to them.

mod fixed_window;
mod key;
mod limiter;
mod protocol;
mod request;
mod throttle;

pub use fixed_window::WindowState;
pub use key::{validate_key, AlgorithmKind, StorageKeys, DEFAULT_CATEGORY};
pub use limiter::RateLimiter;
pub use protocol::ScriptReply;
pub use request::{
    FixedWindowRequest, FixedWindowResult, LimitRequest, ThrottleRequest, ThrottleResult,
};
pub use throttle::BucketState;

/// Pure state transitions, exposed for callers that want to simulate decisions.
pub mod transitions {
    pub use super::fixed_window::transition as fixed_window;
    pub use super::throttle::transition as throttle;
}
