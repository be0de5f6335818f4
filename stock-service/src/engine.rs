use crate::cache::AvailabilityCache;
use crate::error::{SideEffectWarning, StockError};
use crate::ledger::LedgerStore;
use crate::model::{
    OperationKind, OperationRequest, Reservation, ReservationStatus, StockRecord,
    StockUpdateRecord,
};
use crate::reservation_store::ReservationStore;
use chrono::Utc;
use common_events::{EventSink, LowStockAlert, StockOperationEvent, EVENT_SCHEMA_VERSION};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const ROLLBACK_ATTEMPTS: u32 = 3;
const ROLLBACK_BASE_DELAY: Duration = Duration::from_millis(50);

/// Result of a committed operation plus any non-fatal side-effect failures.
#[derive(Debug)]
pub struct OperationOutcome {
    pub record: StockRecord,
    pub update: StockUpdateRecord,
    pub warnings: Vec<SideEffectWarning>,
}

/// The stock accounting engine: sole writer of stock counters and their audit
/// history. All quantity/reserved changes, including those driven by
/// reservations, funnel through [`StockEngine::apply_operation`].
pub struct StockEngine {
    ledger: Arc<dyn LedgerStore>,
    reservations: Arc<dyn ReservationStore>,
    cache: AvailabilityCache,
    events: Arc<dyn EventSink>,
}

impl StockEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        reservations: Arc<dyn ReservationStore>,
        cache: AvailabilityCache,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            ledger,
            reservations,
            cache,
            events,
        }
    }

    /// Validates and applies one ADD/SUBTRACT/RESERVE/RELEASE atomically.
    ///
    /// The ledger transaction either commits both the counter change and its
    /// audit row or leaves nothing behind. Post-commit side effects (cache
    /// invalidation, low-stock signal, downstream notification) are
    /// best-effort: their failure is reported as a warning on the outcome and
    /// never rolls back the committed change.
    pub async fn apply_operation(
        &self,
        request: OperationRequest,
    ) -> Result<OperationOutcome, StockError> {
        if request.quantity <= 0 {
            return Err(StockError::InvalidOperation(format!(
                "operation quantity must be positive (got {})",
                request.quantity
            )));
        }

        let applied = self.ledger.apply(&request).await?;
        let record = applied.record;
        let update = applied.update;
        let mut warnings = Vec::new();

        if let Err(err) = self
            .cache
            .invalidate(request.product_id, request.warehouse_id)
            .await
        {
            tracing::warn!(
                product_id = %request.product_id,
                warehouse_id = %request.warehouse_id,
                error = %err,
                "Failed to invalidate availability cache after commit"
            );
            warnings.push(SideEffectWarning::CacheInvalidation(err.to_string()));
        }

        if record.is_active && record.available() <= record.low_stock_threshold {
            let alert = LowStockAlert {
                product_id: record.product_id,
                warehouse_id: record.warehouse_id,
                available_stock: i64::from(record.available()),
                threshold: record.low_stock_threshold,
                occurred_at: Utc::now(),
            };
            if let Err(err) = self.events.publish_low_stock(&alert).await {
                tracing::warn!(
                    product_id = %record.product_id,
                    warehouse_id = %record.warehouse_id,
                    error = %err,
                    "Failed to emit low-stock signal"
                );
                warnings.push(SideEffectWarning::LowStockSignal(err.to_string()));
            }
        }

        let event = StockOperationEvent {
            event_id: Uuid::new_v4(),
            event_version: EVENT_SCHEMA_VERSION,
            product_id: record.product_id,
            warehouse_id: record.warehouse_id,
            kind: request.kind.as_str().to_string(),
            quantity: request.quantity,
            resulting_quantity: record.quantity,
            resulting_reserved: record.reserved,
            reason: request.reason.clone(),
            reference_id: request.reference_id,
            occurred_at: Utc::now(),
        };
        if let Err(err) = self.events.publish_operation(&event).await {
            tracing::warn!(
                product_id = %record.product_id,
                kind = %request.kind,
                error = %err,
                "Failed to enqueue downstream stock notification"
            );
            warnings.push(SideEffectWarning::Notification(err.to_string()));
        }

        Ok(OperationOutcome {
            record,
            update,
            warnings,
        })
    }

    /// Read-through availability. Cache failures degrade to a ledger read;
    /// they never fail the call.
    pub async fn get_available_stock(
        &self,
        product_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> Result<i64, StockError> {
        match self.cache.get(product_id, warehouse_id).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(product_id = %product_id, error = %err, "Availability cache read failed; falling back to ledger");
            }
        }

        let available = self.ledger.available(product_id, warehouse_id).await?;
        if let Err(err) = self.cache.put(product_id, warehouse_id, available).await {
            tracing::warn!(product_id = %product_id, error = %err, "Failed to populate availability cache");
        }
        Ok(available)
    }

    /// Places a timed hold against available stock.
    ///
    /// The availability pre-check is optimistic: stock consumed between the
    /// check and the RESERVE makes the authoritative ledger call fail, in
    /// which case the just-created reservation is rolled back to CANCELLED so
    /// no ACTIVE reservation exists without a matching hold.
    pub async fn reserve(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        ttl_secs: i64,
    ) -> Result<Reservation, StockError> {
        if quantity <= 0 {
            return Err(StockError::InvalidOperation(format!(
                "reservation quantity must be positive (got {quantity})"
            )));
        }
        if ttl_secs <= 0 {
            return Err(StockError::InvalidOperation(format!(
                "reservation ttl must be positive (got {ttl_secs})"
            )));
        }

        let available = self
            .get_available_stock(product_id, Some(warehouse_id))
            .await?;
        if available < i64::from(quantity) {
            return Err(StockError::InsufficientStock {
                product_id,
                requested: quantity,
                available: available.clamp(0, i64::from(i32::MAX)) as i32,
            });
        }

        let reservation = Reservation::new(product_id, warehouse_id, quantity, ttl_secs);
        self.reservations.insert(&reservation).await?;

        let request = OperationRequest {
            product_id,
            warehouse_id,
            quantity,
            kind: OperationKind::Reserve,
            reason: "Reservation created".to_string(),
            reference_id: Some(reservation.id),
        };
        match self.apply_operation(request).await {
            Ok(outcome) => {
                for warning in &outcome.warnings {
                    tracing::warn!(reservation_id = %reservation.id, %warning, "Reservation side effect degraded");
                }
                Ok(reservation)
            }
            Err(err) => {
                self.rollback_reservation(reservation.id).await;
                Err(err)
            }
        }
    }

    /// Explicitly cancels a reservation and releases its hold. A reservation
    /// that already left ACTIVE (expired or fulfilled meanwhile) is returned
    /// as-is; the lost race is a no-op by design.
    ///
    /// The ACTIVE -> CANCELLED transition is the at-most-once claim on the
    /// release. If the release then fails, the claim is handed back (the
    /// reservation returns to ACTIVE) before the error is surfaced, so a
    /// retried cancel re-attempts the release instead of finding a terminal
    /// row with its hold still in place.
    pub async fn cancel_reservation(&self, id: Uuid) -> Result<Reservation, StockError> {
        if self.reservations.get(id).await?.is_none() {
            return Err(StockError::NotFound(id));
        }

        match self
            .reservations
            .transition(id, ReservationStatus::Active, ReservationStatus::Cancelled)
            .await?
        {
            Some(cancelled) => {
                match self.release_hold(&cancelled, "Reservation cancelled").await {
                    Ok(_) => Ok(cancelled),
                    Err(err) => {
                        self.reinstate_reservation(id, ReservationStatus::Cancelled)
                            .await;
                        Err(err)
                    }
                }
            }
            // Lost the race to expiry or fulfilment; the terminal state stands.
            None => self.get_reservation(id).await,
        }
    }

    pub async fn get_reservation(&self, id: Uuid) -> Result<Reservation, StockError> {
        self.reservations
            .get(id)
            .await?
            .ok_or(StockError::NotFound(id))
    }

    pub async fn set_low_stock_threshold(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        threshold: i32,
    ) -> Result<(), StockError> {
        self.ledger
            .set_low_stock_threshold(product_id, warehouse_id, threshold)
            .await
    }

    /// Deactivates a record so it stops counting toward availability.
    pub async fn deactivate(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<(), StockError> {
        self.ledger.deactivate(product_id, warehouse_id).await?;
        if let Err(err) = self.cache.invalidate(product_id, warehouse_id).await {
            tracing::warn!(product_id = %product_id, error = %err, "Failed to invalidate cache after deactivation");
        }
        Ok(())
    }

    pub async fn get_stock_record(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Option<StockRecord>, StockError> {
        self.ledger.get(product_id, warehouse_id).await
    }

    pub async fn history(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        limit: i64,
    ) -> Result<Vec<StockUpdateRecord>, StockError> {
        self.ledger.history(product_id, warehouse_id, limit).await
    }

    /// Releases the hold backing `reservation`, retrying transient store
    /// failures. Business-rule rejections are surfaced immediately.
    pub(crate) async fn release_hold(
        &self,
        reservation: &Reservation,
        reason: &str,
    ) -> Result<OperationOutcome, StockError> {
        let request = OperationRequest {
            product_id: reservation.product_id,
            warehouse_id: reservation.warehouse_id,
            quantity: reservation.quantity,
            kind: OperationKind::Release,
            reason: reason.to_string(),
            reference_id: Some(reservation.id),
        };

        let mut delay = ROLLBACK_BASE_DELAY;
        let mut attempt = 1;
        loop {
            match self.apply_operation(request.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(StockError::TransientStore(msg)) if attempt < ROLLBACK_ATTEMPTS => {
                    tracing::warn!(
                        reservation_id = %reservation.id,
                        attempt,
                        error = %msg,
                        "Transient failure releasing reservation hold; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        reservation_id = %reservation.id,
                        error = %err,
                        "Failed to release reservation hold"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Hands a claimed reservation back to ACTIVE after its RELEASE failed,
    /// retrying the write with backoff. Leaving the row terminal here would
    /// strand the hold: every later cancel and every sweep would see a
    /// finished reservation and never release the stock.
    pub(crate) async fn reinstate_reservation(&self, id: Uuid, from: ReservationStatus) {
        let mut delay = ROLLBACK_BASE_DELAY;
        for attempt in 1..=ROLLBACK_ATTEMPTS {
            match self
                .reservations
                .transition(id, from, ReservationStatus::Active)
                .await
            {
                Ok(_) => return,
                Err(err) if attempt < ROLLBACK_ATTEMPTS => {
                    tracing::warn!(
                        reservation_id = %id,
                        attempt,
                        error = %err,
                        "Failed to reinstate reservation after release failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    tracing::error!(
                        reservation_id = %id,
                        error = %err,
                        "Could not reinstate reservation; its hold remains unreleased"
                    );
                }
            }
        }
    }

    /// Marks a reservation CANCELLED after its RESERVE failed, retrying the
    /// write with backoff. An ACTIVE reservation with no matching hold is a
    /// correctness hazard, so exhaustion is logged at error level.
    async fn rollback_reservation(&self, id: Uuid) {
        let mut delay = ROLLBACK_BASE_DELAY;
        for attempt in 1..=ROLLBACK_ATTEMPTS {
            match self
                .reservations
                .transition(id, ReservationStatus::Active, ReservationStatus::Cancelled)
                .await
            {
                Ok(_) => return,
                Err(err) if attempt < ROLLBACK_ATTEMPTS => {
                    tracing::warn!(
                        reservation_id = %id,
                        attempt,
                        error = %err,
                        "Failed to roll back reservation; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    tracing::error!(
                        reservation_id = %id,
                        error = %err,
                        "Could not roll back reservation; ACTIVE row has no matching hold"
                    );
                }
            }
        }
    }
}
