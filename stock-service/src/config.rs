use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 900; // 15 minutes
pub const DEFAULT_LOW_STOCK_THRESHOLD: i32 = 5;

#[derive(Debug, Clone)]
pub struct StockConfig {
    pub database_url: String,
    /// Absent selects the in-memory cache (single-process deployments).
    pub redis_url: Option<String>,
    pub cache_ttl: Duration,
    pub reservation_default_ttl_secs: i64,
    pub reservation_expiry_sweep: Duration,
    pub default_low_stock_threshold: i32,
    pub kafka_bootstrap: String,
    pub operation_topic: String,
    pub low_stock_topic: String,
    pub host: String,
    pub port: u16,
}

impl StockConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let redis_url = env::var("REDIS_URL").ok();
        let cache_ttl_secs = env::var("STOCK_CACHE_TTL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_CACHE_TTL_SECS);
        let reservation_default_ttl_secs = env::var("RESERVATION_DEFAULT_TTL_SECS")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(DEFAULT_RESERVATION_TTL_SECS);
        let reservation_expiry_sweep_secs = env::var("RESERVATION_EXPIRY_SWEEP_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(60);
        let default_low_stock_threshold = env::var("DEFAULT_LOW_STOCK_THRESHOLD")
            .ok()
            .and_then(|value| value.parse::<i32>().ok())
            .unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD);
        let kafka_bootstrap =
            env::var("KAFKA_BOOTSTRAP").unwrap_or_else(|_| "localhost:9092".to_string());
        let operation_topic =
            env::var("STOCK_EVENT_TOPIC").unwrap_or_else(|_| "stock.operations".to_string());
        let low_stock_topic =
            env::var("LOW_STOCK_TOPIC").unwrap_or_else(|_| "inventory.low_stock".to_string());
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8091);

        Ok(Self {
            database_url,
            redis_url,
            cache_ttl: Duration::from_secs(cache_ttl_secs.max(1)),
            reservation_default_ttl_secs: reservation_default_ttl_secs.max(1),
            reservation_expiry_sweep: Duration::from_secs(reservation_expiry_sweep_secs.max(1)),
            default_low_stock_threshold: default_low_stock_threshold.max(0),
            kafka_bootstrap,
            operation_topic,
            low_stock_topic,
            host,
            port,
        })
    }
}
