use crate::error::StockError;
use crate::model::{Reservation, ReservationStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Durable record of reservations. `transition` is a conditional update and
/// doubles as the per-reservation serialization point: of two racing
/// transitions out of ACTIVE, exactly one observes `Some`.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn insert(&self, reservation: &Reservation) -> Result<(), StockError>;

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, StockError>;

    /// Atomically moves `id` from `from` to `to`. Returns the updated
    /// reservation, or `None` when the current status no longer matches.
    async fn transition(
        &self,
        id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> Result<Option<Reservation>, StockError>;

    /// ACTIVE reservations whose expiry is at or before `as_of`, oldest first.
    async fn due(
        &self,
        as_of: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Reservation>, StockError>;
}

// ---------------- Postgres Implementation ----------------

pub struct PgReservationStore {
    pool: PgPool,
}

impl PgReservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn reservation_from_row(row: &sqlx::postgres::PgRow) -> Result<Reservation, StockError> {
    let status: String = row.get("status");
    Ok(Reservation {
        id: row.get("id"),
        product_id: row.get("product_id"),
        warehouse_id: row.get("warehouse_id"),
        quantity: row.get("quantity"),
        status: ReservationStatus::from_str(&status)?,
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    })
}

const RESERVATION_COLUMNS: &str =
    "id, product_id, warehouse_id, quantity, status, created_at, expires_at";

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn insert(&self, reservation: &Reservation) -> Result<(), StockError> {
        sqlx::query(
            "INSERT INTO reservations (id, product_id, warehouse_id, quantity, status, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(reservation.id)
        .bind(reservation.product_id)
        .bind(reservation.warehouse_id)
        .bind(reservation.quantity)
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, StockError> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> Result<Option<Reservation>, StockError> {
        let row = sqlx::query(&format!(
            "UPDATE reservations SET status = $3 WHERE id = $1 AND status = $2 \
             RETURNING {RESERVATION_COLUMNS}"
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn due(
        &self,
        as_of: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Reservation>, StockError> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE status = 'ACTIVE' AND expires_at <= $1 ORDER BY expires_at LIMIT $2"
        ))
        .bind(as_of)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(reservation_from_row).collect()
    }
}

// ---------------- In-Memory Implementation (Tests / Local Dev) ----------------

#[derive(Default)]
pub struct InMemoryReservationStore {
    inner: Mutex<HashMap<Uuid, Reservation>>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Reservation> {
        self.inner.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn insert(&self, reservation: &Reservation) -> Result<(), StockError> {
        self.inner
            .lock()
            .await
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, StockError> {
        Ok(self.inner.lock().await.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> Result<Option<Reservation>, StockError> {
        let mut inner = self.inner.lock().await;
        match inner.get_mut(&id) {
            Some(reservation) if reservation.status == from => {
                reservation.status = to;
                Ok(Some(reservation.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn due(
        &self,
        as_of: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Reservation>, StockError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<Reservation> = inner
            .values()
            .filter(|r| r.status == ReservationStatus::Active && r.expires_at <= as_of)
            .cloned()
            .collect();
        due.sort_by_key(|r| r.expires_at);
        due.truncate(limit as usize);
        Ok(due)
    }
}
