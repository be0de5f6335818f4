use crate::error::StockError;
use crate::model::{OperationRequest, StockRecord, StockUpdateRecord};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Result of one committed ledger transaction.
#[derive(Debug, Clone)]
pub struct AppliedOperation {
    pub record: StockRecord,
    pub update: StockUpdateRecord,
}

/// Durable, transactional source of truth for stock counters and their
/// append-only history. `apply` is the per-key serialization point: two
/// operations on the same (product, warehouse) never interleave, and a
/// failed operation leaves no partial state behind.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn apply(&self, request: &OperationRequest) -> Result<AppliedOperation, StockError>;

    async fn get(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Option<StockRecord>, StockError>;

    /// Sum of `quantity - reserved` across active records for the product,
    /// optionally narrowed to one warehouse.
    async fn available(
        &self,
        product_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> Result<i64, StockError>;

    async fn history(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        limit: i64,
    ) -> Result<Vec<StockUpdateRecord>, StockError>;

    async fn set_low_stock_threshold(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        threshold: i32,
    ) -> Result<(), StockError>;

    /// Records are never hard-deleted, only deactivated.
    async fn deactivate(&self, product_id: Uuid, warehouse_id: Uuid) -> Result<(), StockError>;
}

// ---------------- Postgres Implementation ----------------

pub struct PgLedgerStore {
    pool: PgPool,
    default_threshold: i32,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, default_threshold: i32) -> Self {
        Self {
            pool,
            default_threshold,
        }
    }
}

const SELECT_RECORD: &str = "SELECT product_id, warehouse_id, quantity, reserved, low_stock_threshold, is_active, last_updated \
     FROM stock_records WHERE product_id = $1 AND warehouse_id = $2";

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn apply(&self, request: &OperationRequest) -> Result<AppliedOperation, StockError> {
        let mut tx = self.pool.begin().await?;

        // Lazy row creation before taking the lock; the conflict target makes
        // concurrent first-writers converge on the same row.
        sqlx::query(
            "INSERT INTO stock_records (product_id, warehouse_id, quantity, reserved, low_stock_threshold, is_active, last_updated) \
             VALUES ($1, $2, 0, 0, $3, TRUE, NOW()) ON CONFLICT (product_id, warehouse_id) DO NOTHING",
        )
        .bind(request.product_id)
        .bind(request.warehouse_id)
        .bind(self.default_threshold)
        .execute(&mut *tx)
        .await?;

        let mut record = sqlx::query_as::<_, StockRecord>(&format!("{SELECT_RECORD} FOR UPDATE"))
            .bind(request.product_id)
            .bind(request.warehouse_id)
            .fetch_one(&mut *tx)
            .await?;

        // Business-rule rejection rolls the transaction back on drop.
        record.apply_kind(request.kind, request.quantity)?;

        sqlx::query(
            "UPDATE stock_records SET quantity = $3, reserved = $4, last_updated = NOW() \
             WHERE product_id = $1 AND warehouse_id = $2",
        )
        .bind(request.product_id)
        .bind(request.warehouse_id)
        .bind(record.quantity)
        .bind(record.reserved)
        .execute(&mut *tx)
        .await?;

        let update = sqlx::query_as::<_, StockUpdateRecord>(
            "INSERT INTO stock_updates (product_id, warehouse_id, kind, delta, resulting_quantity, resulting_reserved, reason, reference_id, applied_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW()) \
             RETURNING id, product_id, warehouse_id, kind, delta, resulting_quantity, resulting_reserved, reason, reference_id, applied_at",
        )
        .bind(request.product_id)
        .bind(request.warehouse_id)
        .bind(request.kind.as_str())
        .bind(request.quantity)
        .bind(record.quantity)
        .bind(record.reserved)
        .bind(&request.reason)
        .bind(request.reference_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AppliedOperation { record, update })
    }

    async fn get(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Option<StockRecord>, StockError> {
        let record = sqlx::query_as::<_, StockRecord>(SELECT_RECORD)
            .bind(product_id)
            .bind(warehouse_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn available(
        &self,
        product_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> Result<i64, StockError> {
        let available = match warehouse_id {
            Some(warehouse_id) => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COALESCE(SUM(quantity - reserved), 0) FROM stock_records \
                     WHERE product_id = $1 AND warehouse_id = $2 AND is_active",
                )
                .bind(product_id)
                .bind(warehouse_id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COALESCE(SUM(quantity - reserved), 0) FROM stock_records \
                     WHERE product_id = $1 AND is_active",
                )
                .bind(product_id)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(available)
    }

    async fn history(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        limit: i64,
    ) -> Result<Vec<StockUpdateRecord>, StockError> {
        let rows = sqlx::query_as::<_, StockUpdateRecord>(
            "SELECT id, product_id, warehouse_id, kind, delta, resulting_quantity, resulting_reserved, reason, reference_id, applied_at \
             FROM stock_updates WHERE product_id = $1 AND warehouse_id = $2 ORDER BY id DESC LIMIT $3",
        )
        .bind(product_id)
        .bind(warehouse_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_low_stock_threshold(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        threshold: i32,
    ) -> Result<(), StockError> {
        sqlx::query(
            "UPDATE stock_records SET low_stock_threshold = $3, last_updated = NOW() \
             WHERE product_id = $1 AND warehouse_id = $2",
        )
        .bind(product_id)
        .bind(warehouse_id)
        .bind(threshold)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deactivate(&self, product_id: Uuid, warehouse_id: Uuid) -> Result<(), StockError> {
        sqlx::query(
            "UPDATE stock_records SET is_active = FALSE, last_updated = NOW() \
             WHERE product_id = $1 AND warehouse_id = $2",
        )
        .bind(product_id)
        .bind(warehouse_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---------------- In-Memory Implementation (Tests / Local Dev) ----------------

#[derive(Default)]
struct MemoryLedgerInner {
    records: HashMap<(Uuid, Uuid), StockRecord>,
    history: Vec<StockUpdateRecord>,
    next_update_id: i64,
}

pub struct InMemoryLedgerStore {
    inner: Mutex<MemoryLedgerInner>,
    default_threshold: i32,
}

impl InMemoryLedgerStore {
    pub fn new(default_threshold: i32) -> Self {
        Self {
            inner: Mutex::new(MemoryLedgerInner::default()),
            default_threshold,
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn apply(&self, request: &OperationRequest) -> Result<AppliedOperation, StockError> {
        let mut inner = self.inner.lock().await;
        let key = (request.product_id, request.warehouse_id);

        // Mutate a copy and store it only on success; a rejected operation on
        // an absent key must not leave a zeroed record behind.
        let mut record = inner.records.get(&key).cloned().unwrap_or_else(|| {
            StockRecord::empty(
                request.product_id,
                request.warehouse_id,
                self.default_threshold,
            )
        });
        record.apply_kind(request.kind, request.quantity)?;
        inner.records.insert(key, record.clone());

        inner.next_update_id += 1;
        let update = StockUpdateRecord {
            id: inner.next_update_id,
            product_id: request.product_id,
            warehouse_id: request.warehouse_id,
            kind: request.kind.as_str().to_string(),
            delta: request.quantity,
            resulting_quantity: record.quantity,
            resulting_reserved: record.reserved,
            reason: request.reason.clone(),
            reference_id: request.reference_id,
            applied_at: Utc::now(),
        };
        inner.history.push(update.clone());

        Ok(AppliedOperation { record, update })
    }

    async fn get(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Option<StockRecord>, StockError> {
        let inner = self.inner.lock().await;
        Ok(inner.records.get(&(product_id, warehouse_id)).cloned())
    }

    async fn available(
        &self,
        product_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> Result<i64, StockError> {
        let inner = self.inner.lock().await;
        let total = inner
            .records
            .values()
            .filter(|r| r.product_id == product_id && r.is_active)
            .filter(|r| warehouse_id.map_or(true, |w| r.warehouse_id == w))
            .map(|r| i64::from(r.available()))
            .sum();
        Ok(total)
    }

    async fn history(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        limit: i64,
    ) -> Result<Vec<StockUpdateRecord>, StockError> {
        let inner = self.inner.lock().await;
        let rows = inner
            .history
            .iter()
            .rev()
            .filter(|u| u.product_id == product_id && u.warehouse_id == warehouse_id)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn set_low_stock_threshold(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        threshold: i32,
    ) -> Result<(), StockError> {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.records.get_mut(&(product_id, warehouse_id)) {
            record.low_stock_threshold = threshold;
            record.last_updated = Utc::now();
        }
        Ok(())
    }

    async fn deactivate(&self, product_id: Uuid, warehouse_id: Uuid) -> Result<(), StockError> {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.records.get_mut(&(product_id, warehouse_id)) {
            record.is_active = false;
            record.last_updated = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationKind;

    fn request(kind: OperationKind, quantity: i32) -> OperationRequest {
        OperationRequest {
            product_id: Uuid::new_v4(),
            warehouse_id: Uuid::new_v4(),
            quantity,
            kind,
            reason: "test".to_string(),
            reference_id: None,
        }
    }

    #[tokio::test]
    async fn rejected_operation_on_absent_key_creates_no_record() {
        let store = InMemoryLedgerStore::new(5);
        let req = request(OperationKind::Reserve, 10);

        let err = store.apply(&req).await.unwrap_err();
        assert!(matches!(err, StockError::InsufficientStock { .. }));

        assert!(store
            .get(req.product_id, req.warehouse_id)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .history(req.product_id, req.warehouse_id, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn accepted_operation_creates_record_lazily() {
        let store = InMemoryLedgerStore::new(5);
        let req = request(OperationKind::Add, 7);

        let applied = store.apply(&req).await.unwrap();
        assert_eq!(applied.record.quantity, 7);
        assert!(store
            .get(req.product_id, req.warehouse_id)
            .await
            .unwrap()
            .is_some());
    }
}
