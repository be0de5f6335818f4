use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const EVENT_SCHEMA_VERSION: i32 = 1;

/// Downstream notification describing one committed stock mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockOperationEvent {
    pub event_id: Uuid,
    pub event_version: i32,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub kind: String,
    pub quantity: i32,
    pub resulting_quantity: i32,
    pub resulting_reserved: i32,
    pub reason: String,
    pub reference_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

/// Raised when available stock crosses at or below the configured threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub available_stock: i64,
    pub threshold: i32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("producer not configured")]
    NotConfigured,
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("kafka error: {0}")]
    Kafka(String),
}

pub type EventResult<T> = Result<T, EventError>;
