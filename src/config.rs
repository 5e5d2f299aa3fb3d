use std::env;
use std::time::Duration;

use crate::error::AppError;
use crate::ratelimit::RateLimitConfig;
use crate::upstream::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub order_service_url: Option<String>,
    pub order_service_timeout: Duration,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    pub expiry_interval: Duration,
    pub event_queue_size: usize,
    pub event_buffer_size: usize,
    pub backfill_window: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            database_url: optional("DATABASE_URL"),
            database_max_connections: parse_or_default("DATABASE_MAX_CONNECTIONS", 10)?,
            order_service_url: optional("ORDER_SERVICE_URL"),
            order_service_timeout: Duration::from_millis(parse_or_default(
                "ORDER_SERVICE_TIMEOUT_MS",
                2000,
            )?),
            rate_limit: RateLimitConfig {
                rate: parse_or_default("RATE_LIMIT_RPS", 10.0)?,
                burst: parse_or_default("RATE_LIMIT_BURST", 20.0)?,
                idle_ttl: Duration::from_secs(parse_or_default("RATE_LIMIT_TTL_SECS", 600)?),
            },
            retry: RetryPolicy {
                max_attempts: parse_or_default("RETRY_MAX_ATTEMPTS", 5)?,
                base_delay: Duration::from_millis(parse_or_default("RETRY_BASE_DELAY_MS", 100)?),
                max_delay: Duration::from_millis(parse_or_default("RETRY_MAX_DELAY_MS", 2000)?),
            },
            expiry_interval: Duration::from_secs(parse_or_default("EXPIRY_INTERVAL_SECS", 30)?),
            event_queue_size: parse_or_default("EVENT_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            backfill_window: Duration::from_secs(parse_or_default("BACKFILL_WINDOW_SECS", 0)?),
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

/// Unset and blank are both treated as absent.
fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}
