use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sharedlimit::config::{LoggingConfig, SharedLimitConfig};
use sharedlimit::{FixedWindowRequest, RateLimiter, RedisStore, ThrottleRequest};

/// Ask a shared store whether requests for a key are allowed.
#[derive(Debug, Parser)]
#[command(name = "sharedlimit", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Store URL, overriding the configuration
    #[arg(long)]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fixed window counter
    Fixed {
        #[arg(long)]
        key: String,
        /// Requests allowed per window
        #[arg(long)]
        capacity: i64,
        /// Window length in seconds
        #[arg(long)]
        window: i64,
        #[command(flatten)]
        pacing: Pacing,
    },
    /// Token bucket
    Throttle {
        #[arg(long)]
        key: String,
        /// Bucket size
        #[arg(long)]
        capacity: i64,
        /// Tokens added per second
        #[arg(long)]
        refill_rate: i64,
        #[command(flatten)]
        pacing: Pacing,
    },
}

#[derive(Debug, clap::Args)]
struct Pacing {
    /// Number of requests to issue
    #[arg(long, default_value_t = 1)]
    repeat: u32,
    /// Pause between requests, in milliseconds
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = SharedLimitConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.redis_url {
        config.store.url = url;
    }

    init_tracing(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting sharedlimit");

    let store = Arc::new(RedisStore::connect(&config.store).await?);
    let limiter = RateLimiter::with_category(store, config.keys.category.clone());

    match cli.command {
        Command::Fixed {
            key,
            capacity,
            window,
            pacing,
        } => {
            let request = FixedWindowRequest::new(key, capacity, window);
            for i in 0..pacing.repeat {
                pause(&pacing, i).await;
                let result = limiter.validate_fixed_window(&request).await?;
                println!("{}", serde_json::to_string(&result)?);
            }
        }
        Command::Throttle {
            key,
            capacity,
            refill_rate,
            pacing,
        } => {
            let request = ThrottleRequest::new(key, capacity, refill_rate);
            for i in 0..pacing.repeat {
                pause(&pacing, i).await;
                let result = limiter.validate_throttle(&request).await?;
                println!("{}", serde_json::to_string(&result)?);
            }
        }
    }

    Ok(())
}

/// Initialize tracing; `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn pause(pacing: &Pacing, iteration: u32) {
    if iteration > 0 && pacing.interval_ms > 0 {
        tokio::time::sleep(Duration::from_millis(pacing.interval_ms)).await;
    }
}
