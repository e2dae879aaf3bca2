//! In-process shared store.
//!
//! Useful for single-instance deployments and tests. Script evaluation holds
//! one lock for the whole transition, which gives the same isolation a
//! server-side script gets from a single-threaded store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::{AtomicScript, ScriptState, SharedStore};
use crate::clock::Ticks;
use crate::error::{RateLimitError, Result};

/// Source of the store's notion of "now".
pub trait TimeSource: Send + Sync {
    /// Time elapsed since the Unix epoch.
    fn now(&self) -> Result<Duration>;
}

/// Reads the host's system time.
#[derive(Debug, Clone, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Result<Duration> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| RateLimitError::StoreUnavailable(format!("system clock error: {}", e)))
    }
}

/// A manually driven time source.
///
/// Clones share the same underlying instant, so a test can keep one handle
/// and advance the time seen by the store.
#[derive(Debug, Clone)]
pub struct ManualTimeSource {
    nanos: Arc<AtomicU64>,
    should_fail: Arc<AtomicBool>,
}

impl ManualTimeSource {
    /// Start at `since_epoch`.
    pub fn new(since_epoch: Duration) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(since_epoch.as_nanos() as u64)),
            should_fail: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute instant, possibly backwards.
    pub fn set(&self, since_epoch: Duration) {
        self.nanos.store(since_epoch.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Make the next read fail as if the store were unreachable.
    pub fn fail_next_call(&self) {
        self.should_fail.store(true, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Result<Duration> {
        if self.should_fail.swap(false, Ordering::SeqCst) {
            return Err(RateLimitError::StoreUnavailable(
                "time source unavailable".into(),
            ));
        }
        Ok(Duration::from_nanos(self.nanos.load(Ordering::SeqCst)))
    }
}

/// Shared store kept in process memory.
pub struct InMemoryStore<T: TimeSource = SystemTimeSource> {
    entries: Mutex<HashMap<String, String>>,
    time: T,
    unavailable: AtomicBool,
}

struct LockedEntries<'a> {
    entries: &'a mut HashMap<String, String>,
    now: Ticks,
}

impl ScriptState for LockedEntries<'_> {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    fn now(&self) -> Ticks {
        self.now
    }
}

impl InMemoryStore<SystemTimeSource> {
    /// Create an empty store using system time.
    pub fn new() -> Self {
        Self::with_time_source(SystemTimeSource)
    }
}

impl Default for InMemoryStore<SystemTimeSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeSource> InMemoryStore<T> {
    /// Create an empty store reading time from `time`.
    pub fn with_time_source(time: T) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            time,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: while set, every operation fails with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove every key.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RateLimitError::StoreUnavailable(
                "in-memory store marked unavailable".into(),
            ))
        } else {
            Ok(())
        }
    }

    fn evaluate_locked(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> Result<String> {
        let mut entries = self.entries.lock();
        // Time is read under the lock so evaluation order and time order agree
        let now = Ticks::from_duration(self.time.now()?);
        let mut state = LockedEntries {
            entries: &mut entries,
            now,
        };
        script.run_native(&mut state, keys, args)
    }
}

#[async_trait]
impl<T: TimeSource> SharedStore for InMemoryStore<T> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_available()?;
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_available()?;
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn evaluate(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> Result<String> {
        self.ensure_available()?;
        trace!(script = script.name(), keys = ?keys, "Evaluating script in memory");
        self.evaluate_locked(script, keys, args)
    }

    async fn time(&self) -> Result<Duration> {
        self.ensure_available()?;
        self.time.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_script(
        state: &mut dyn ScriptState,
        keys: &[String],
        args: &[String],
    ) -> Result<String> {
        let mut value = state.get(&keys[0]).unwrap_or_default();
        value.push_str(&args[0]);
        state.set(&keys[0], value.clone());
        Ok(value)
    }

    const APPEND: AtomicScript = AtomicScript::new("append", "", append_script);

    fn record_time_script(
        state: &mut dyn ScriptState,
        keys: &[String],
        _args: &[String],
    ) -> Result<String> {
        let now = state.now().to_string();
        state.set(&keys[0], now.clone());
        Ok(now)
    }

    const RECORD_TIME: AtomicScript = AtomicScript::new("record_time", "", record_time_script);

    #[tokio::test]
    async fn test_get_set() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_evaluate_runs_native_transition() {
        let store = InMemoryStore::new();
        let keys = vec!["k".to_string()];

        let first = store.evaluate(&APPEND, &keys, &["x".to_string()]).await.unwrap();
        let second = store.evaluate(&APPEND, &keys, &["y".to_string()]).await.unwrap();

        assert_eq!(first, "x");
        assert_eq!(second, "xy");
        assert_eq!(store.get("k").await.unwrap(), Some("xy".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_evaluate_is_serialized() {
        let store = Arc::new(InMemoryStore::new());
        let keys = vec!["k".to_string()];

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let keys = keys.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.evaluate(&APPEND, &keys, &["."].map(String::from)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get("k").await.unwrap().unwrap().len(), 400);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_operation() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);

        assert!(matches!(
            store.get("a").await,
            Err(RateLimitError::StoreUnavailable(_))
        ));
        assert!(matches!(
            store.time().await,
            Err(RateLimitError::StoreUnavailable(_))
        ));
        assert!(store.evaluate(&APPEND, &["k".to_string()], &["x".to_string()]).await.is_err());
        assert!(store.is_empty());

        store.set_unavailable(false);
        assert!(store.set("a", "1").await.is_ok());
    }

    #[tokio::test]
    async fn test_evaluate_reads_time_per_evaluation() {
        let time = ManualTimeSource::new(Duration::from_secs(100));
        let store = InMemoryStore::with_time_source(time.clone());
        let keys = vec!["t".to_string()];

        let first = store.evaluate(&RECORD_TIME, &keys, &[]).await.unwrap();
        time.advance(Duration::from_micros(1));
        let second = store.evaluate(&RECORD_TIME, &keys, &[]).await.unwrap();

        assert_eq!(first, (100 * crate::clock::TICKS_PER_SECOND).to_string());
        assert_eq!(second, (100 * crate::clock::TICKS_PER_SECOND + 10).to_string());
    }

    #[tokio::test]
    async fn test_time_failure_aborts_evaluation() {
        let time = ManualTimeSource::new(Duration::from_secs(100));
        let store = InMemoryStore::with_time_source(time.clone());
        time.fail_next_call();

        let err = store
            .evaluate(&RECORD_TIME, &["t".to_string()], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RateLimitError::StoreUnavailable(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_manual_time_source() {
        let time = ManualTimeSource::new(Duration::from_secs(10));
        let shared = time.clone();

        shared.advance(Duration::from_millis(1500));
        assert_eq!(time.now().unwrap(), Duration::from_millis(11_500));

        shared.set(Duration::from_secs(5));
        assert_eq!(time.now().unwrap(), Duration::from_secs(5));

        time.fail_next_call();
        assert!(time.now().is_err());
        assert!(time.now().is_ok());
    }

    #[test]
    fn test_system_time_source_is_after_2020() {
        let now = SystemTimeSource.now().unwrap();
        assert!(now > Duration::from_secs(1_577_836_800));
    }
}
