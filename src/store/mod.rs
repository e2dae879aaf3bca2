//! Shared store abstraction.
//!
//! The limiter needs three things from the store: scalar get/set, an atomic
//! multi-key script evaluation, and the store's own clock. Any backend that
//! offers those can arbitrate rate limits for many instances.

mod memory;
mod redis_store;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Ticks;
use crate::error::Result;

pub use self::memory::{InMemoryStore, ManualTimeSource, SystemTimeSource, TimeSource};
pub use self::redis_store::RedisStore;

/// Key/value view handed to a native script transition.
///
/// Every read and write goes through the store's isolation boundary, so a
/// transition observes and produces a consistent snapshot.
pub trait ScriptState {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Write `value` under `key`.
    fn set(&mut self, key: &str, value: String);

    /// Store time, read once inside the isolation boundary of this evaluation.
    ///
    /// Evaluations therefore see non-decreasing times in the order they run,
    /// as long as the store's own clock does not step backwards.
    fn now(&self) -> Ticks;
}

/// Native form of a script: reads/writes `keys` through `state` and returns the raw reply.
pub type NativeTransition = fn(&mut dyn ScriptState, &[String], &[String]) -> Result<String>;

/// A read-modify-write unit the store executes atomically.
///
/// Scripts carry a Lua body for stores with server-side scripting and an
/// equivalent native transition for stores that serialise evaluation
/// in-process. Both must produce the same reply for the same inputs.
pub struct AtomicScript {
    name: &'static str,
    lua: &'static str,
    native: NativeTransition,
}

impl AtomicScript {
    /// Define a script.
    pub const fn new(name: &'static str, lua: &'static str, native: NativeTransition) -> Self {
        Self { name, lua, native }
    }

    /// Short identifier, used for logging and script caching.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Lua source of the script.
    pub fn lua(&self) -> &'static str {
        self.lua
    }

    /// Run the native transition against `state`.
    pub fn run_native(
        &self,
        state: &mut dyn ScriptState,
        keys: &[String],
        args: &[String],
    ) -> Result<String> {
        (self.native)(state, keys, args)
    }
}

impl fmt::Debug for AtomicScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicScript")
            .field("name", &self.name)
            .finish()
    }
}

/// A strongly-ordered store shared by every limiter instance.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read a scalar value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a scalar value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Execute `script` as one indivisible, isolated unit and return its reply.
    ///
    /// The store's time is read inside the same unit and handed to the script.
    async fn evaluate(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> Result<String>;

    /// The store's current time as a span since the Unix epoch.
    async fn time(&self) -> Result<Duration>;
}
