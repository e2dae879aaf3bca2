//! Redis-backed shared store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use tracing::{debug, info, warn};

use super::{AtomicScript, SharedStore};
use crate::config::StoreConfig;
use crate::error::{RateLimitError, Result};

/// Shared store backed by a Redis (or protocol-compatible) server.
///
/// Scripts run server-side through `EVALSHA`, falling back to `EVAL` when the
/// server has not cached the script yet. Redis runs each script to completion
/// before serving any other command, which is what makes the limiter's
/// read-modify-write atomic across instances.
pub struct RedisStore {
    connection: ConnectionManager,
    scripts: DashMap<&'static str, Arc<redis::Script>>,
    response_timeout: Duration,
}

impl RedisStore {
    /// Connect using the given store configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to shared store");

        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            warn!(error = %e, "Invalid shared store URL");
            RateLimitError::Config(format!("invalid store url: {}", e))
        })?;

        let connection = with_timeout(
            config.connection_timeout(),
            "connect",
            ConnectionManager::new(client),
        )
        .await?;

        let store = Self {
            connection,
            scripts: DashMap::new(),
            response_timeout: config.response_timeout(),
        };
        store.ping().await?;

        debug!("Connected to shared store");
        Ok(store)
    }

    /// Check that the server answers.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = self
            .run("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    fn script(&self, script: &AtomicScript) -> Arc<redis::Script> {
        self.scripts
            .entry(script.name())
            .or_insert_with(|| Arc::new(redis::Script::new(script.lua())))
            .value()
            .clone()
    }

    async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        with_timeout(self.response_timeout, operation, fut).await
    }
}

async fn with_timeout<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(|e| {
            warn!(operation, error = %e, "Shared store operation failed");
            RateLimitError::from(e)
        }),
        Err(_) => {
            warn!(operation, timeout_ms = limit.as_millis() as u64, "Shared store timed out");
            Err(RateLimitError::StoreTimeout(format!(
                "{} did not complete within {:?}",
                operation, limit
            )))
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value = self
            .run("GET", redis::cmd("GET").arg(key).query_async(&mut conn))
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = self
            .run(
                "SET",
                redis::cmd("SET").arg(key).arg(value).query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn evaluate(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> Result<String> {
        let compiled = self.script(script);
        let mut invocation = compiled.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }

        let mut conn = self.connection.clone();
        let reply = self
            .run("EVALSHA", invocation.invoke_async(&mut conn))
            .await?;
        Ok(reply)
    }

    async fn time(&self) -> Result<Duration> {
        let mut conn = self.connection.clone();
        let (secs, micros): (u64, u64) = self
            .run("TIME", redis::cmd("TIME").query_async(&mut conn))
            .await?;
        Ok(Duration::from_secs(secs) + Duration::from_micros(micros))
    }
}
