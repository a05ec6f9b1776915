//! Environment-driven service configuration.

use std::time::Duration;

/// Settings read once at startup.
///
/// Absent `DATABASE_URL` selects the in-memory store, which only makes sense
/// for local development; the process warns about it on boot.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub order_stream_key: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub dispatch_max_concurrent: usize,
    pub dispatch_max_attempts: u32,
    pub dispatch_handler_timeout: Duration,
    pub dispatch_receive_backoff: Duration,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            order_stream_key: env_or("ORDER_STREAM_KEY", "orders:events"),
            consumer_group: env_or("CONSUMER_GROUP", "invoice-dispatch"),
            consumer_name: env_or("CONSUMER_NAME", "invoice-dispatch-1"),
            dispatch_max_concurrent: env_parsed("DISPATCH_MAX_CONCURRENT", 4),
            dispatch_max_attempts: env_parsed("DISPATCH_MAX_ATTEMPTS", 5),
            dispatch_handler_timeout: Duration::from_millis(env_parsed(
                "DISPATCH_HANDLER_TIMEOUT_MS",
                30_000,
            )),
            dispatch_receive_backoff: Duration::from_millis(env_parsed(
                "DISPATCH_RECEIVE_BACKOFF_MS",
                500,
            )),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, raw = %raw, "unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}
