//! Shared clock backed by the store's own time source.
//!
//! Every limiter instance reads the current instant from the shared store
//! instead of its local wall clock, so admission decisions made on different
//! machines agree on "now".

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::error::Result;
use crate::store::SharedStore;

/// Number of ticks in one second (one tick is 100 nanoseconds).
pub const TICKS_PER_SECOND: i64 = 10_000_000;

const NANOS_PER_TICK: u32 = 100;

/// An instant or span expressed in 100-nanosecond ticks since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ticks(pub i64);

impl Ticks {
    /// Convert a duration (usually time since the Unix epoch) into ticks.
    pub fn from_duration(duration: Duration) -> Self {
        let whole = duration.as_secs() as i64 * TICKS_PER_SECOND;
        Ticks(whole + (duration.subsec_nanos() / NANOS_PER_TICK) as i64)
    }

    /// Whole seconds expressed as ticks, or `None` on overflow.
    pub fn checked_from_secs(secs: i64) -> Option<Self> {
        secs.checked_mul(TICKS_PER_SECOND).map(Ticks)
    }

    /// Raw tick count.
    pub fn get(self) -> i64 {
        self.0
    }

    /// The span in fractional seconds.
    pub fn as_seconds_f64(self) -> f64 {
        self.0 as f64 / TICKS_PER_SECOND as f64
    }

    /// Interpret the ticks as an instant since the Unix epoch.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let secs = self.0.div_euclid(TICKS_PER_SECOND);
        let nanos = self.0.rem_euclid(TICKS_PER_SECOND) as u32 * NANOS_PER_TICK;
        DateTime::from_timestamp(secs, nanos)
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The single authoritative time reference for all limiter instances.
pub struct SharedClock<S: SharedStore + ?Sized> {
    store: Arc<S>,
}

impl<S: SharedStore + ?Sized> SharedClock<S> {
    /// Create a clock reading time from the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Current store time in ticks.
    ///
    /// Fails with the store's error when it is unreachable; there is no local fallback.
    pub async fn now(&self) -> Result<Ticks> {
        let since_epoch = self.store.time().await?;
        let now = Ticks::from_duration(since_epoch);
        trace!(ticks = now.get(), at = ?now.to_datetime(), "Read shared clock");
        Ok(now)
    }
}

impl<S: SharedStore + ?Sized> Clone for SharedClock<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}
