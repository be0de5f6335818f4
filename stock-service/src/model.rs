use crate::error::StockError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Kinds of mutation the accounting engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Add,
    Subtract,
    Reserve,
    Release,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Add => "ADD",
            OperationKind::Subtract => "SUBTRACT",
            OperationKind::Reserve => "RESERVE",
            OperationKind::Release => "RELEASE",
        }
    }
}

impl FromStr for OperationKind {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(OperationKind::Add),
            "SUBTRACT" => Ok(OperationKind::Subtract),
            "RESERVE" => Ok(OperationKind::Reserve),
            "RELEASE" => Ok(OperationKind::Release),
            other => Err(StockError::InvalidOperation(format!(
                "unrecognized operation kind: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single requested mutation against one (product, warehouse) key.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i32,
    pub kind: OperationKind,
    pub reason: String,
    pub reference_id: Option<Uuid>,
}

/// Durable per-(product, warehouse) counters. Invariant at all times:
/// `0 <= reserved <= quantity`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StockRecord {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i32,
    pub reserved: i32,
    pub low_stock_threshold: i32,
    pub is_active: bool,
    pub last_updated: DateTime<Utc>,
}

impl StockRecord {
    /// Zeroed record created lazily on first mutation of a key.
    pub fn empty(product_id: Uuid, warehouse_id: Uuid, low_stock_threshold: i32) -> Self {
        Self {
            product_id,
            warehouse_id,
            quantity: 0,
            reserved: 0,
            low_stock_threshold,
            is_active: true,
            last_updated: Utc::now(),
        }
    }

    pub fn available(&self) -> i32 {
        self.quantity - self.reserved
    }

    /// Applies one operation kind to the counters, enforcing the
    /// non-negative invariants. Called only inside a store's transaction so
    /// every backend shares identical semantics.
    pub fn apply_kind(&mut self, kind: OperationKind, amount: i32) -> Result<(), StockError> {
        match kind {
            OperationKind::Add => {
                self.quantity += amount;
            }
            OperationKind::Subtract => {
                if self.available() < amount {
                    return Err(StockError::InsufficientStock {
                        product_id: self.product_id,
                        requested: amount,
                        available: self.available(),
                    });
                }
                self.quantity -= amount;
            }
            OperationKind::Reserve => {
                if self.available() < amount {
                    return Err(StockError::InsufficientStock {
                        product_id: self.product_id,
                        requested: amount,
                        available: self.available(),
                    });
                }
                self.reserved += amount;
            }
            OperationKind::Release => {
                if self.reserved < amount {
                    return Err(StockError::InvalidRelease {
                        product_id: self.product_id,
                        requested: amount,
                        reserved: self.reserved,
                    });
                }
                self.reserved -= amount;
            }
        }
        self.last_updated = Utc::now();
        Ok(())
    }
}

/// Write-once audit entry for one applied operation.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StockUpdateRecord {
    pub id: i64,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub kind: String,
    pub delta: i32,
    pub resulting_quantity: i32,
    pub resulting_reserved: i32,
    pub reason: String,
    pub reference_id: Option<Uuid>,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Active,
    Expired,
    Fulfilled,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Expired => "EXPIRED",
            ReservationStatus::Fulfilled => "FULFILLED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }
}

impl FromStr for ReservationStatus {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ReservationStatus::Active),
            "EXPIRED" => Ok(ReservationStatus::Expired),
            "FULFILLED" => Ok(ReservationStatus::Fulfilled),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            other => Err(StockError::TransientStore(format!(
                "unknown reservation status in store: {other}"
            ))),
        }
    }
}

/// A timed hold against available stock. Each ACTIVE reservation corresponds
/// to exactly one outstanding RESERVE delta referenced by its id.
#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i32,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(product_id: Uuid, warehouse_id: Uuid, quantity: i32, ttl_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            product_id,
            warehouse_id,
            quantity,
            status: ReservationStatus::Active,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_secs),
        }
    }
}
