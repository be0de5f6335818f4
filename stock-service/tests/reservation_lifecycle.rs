use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_events::MemoryEventSink;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stock_service::{
    AppliedOperation, AvailabilityCache, ExpiryScheduler, InMemoryCacheStore, InMemoryLedgerStore,
    InMemoryReservationStore, LedgerStore, OperationKind, OperationRequest, Reservation,
    ReservationStatus, ReservationStore, StockEngine, StockError, StockRecord, StockUpdateRecord,
};
use uuid::Uuid;

struct Harness {
    engine: Arc<StockEngine>,
    reservations: Arc<InMemoryReservationStore>,
    cache: Arc<InMemoryCacheStore>,
    scheduler: ExpiryScheduler,
}

fn harness() -> Harness {
    let ledger = Arc::new(InMemoryLedgerStore::new(5));
    let reservations = Arc::new(InMemoryReservationStore::new());
    let cache = Arc::new(InMemoryCacheStore::new());
    let engine = Arc::new(StockEngine::new(
        ledger,
        reservations.clone(),
        AvailabilityCache::new(cache.clone(), Duration::from_secs(300)),
        Arc::new(MemoryEventSink::new()),
    ));
    let scheduler = ExpiryScheduler::new(engine.clone(), reservations.clone(), Duration::from_secs(60));
    Harness {
        engine,
        reservations,
        cache,
        scheduler,
    }
}

async fn seed(engine: &StockEngine, product: Uuid, warehouse: Uuid, quantity: i32) {
    engine
        .apply_operation(OperationRequest {
            product_id: product,
            warehouse_id: warehouse,
            quantity,
            kind: OperationKind::Add,
            reason: "seed".to_string(),
            reference_id: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn reserve_places_hold_and_returns_active_reservation() {
    let h = harness();
    let (product, warehouse) = (Uuid::new_v4(), Uuid::new_v4());
    seed(&h.engine, product, warehouse, 100).await;

    let reservation = h.engine.reserve(product, warehouse, 20, 60).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Active);
    assert_eq!(reservation.quantity, 20);
    assert!(reservation.expires_at > reservation.created_at);

    let record = h
        .engine
        .get_stock_record(product, warehouse)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.reserved, 20);

    let fetched = h.engine.get_reservation(reservation.id).await.unwrap();
    assert_eq!(fetched.id, reservation.id);
}

#[tokio::test]
async fn reserve_rejects_when_available_too_low() {
    let h = harness();
    let (product, warehouse) = (Uuid::new_v4(), Uuid::new_v4());
    seed(&h.engine, product, warehouse, 10).await;

    let err = h.engine.reserve(product, warehouse, 11, 60).await.unwrap_err();
    assert!(matches!(err, StockError::InsufficientStock { .. }));

    let record = h
        .engine
        .get_stock_record(product, warehouse)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.reserved, 0);
    assert!(h.reservations.all().await.is_empty());
}

#[tokio::test]
async fn reserve_rejects_non_positive_inputs() {
    let h = harness();
    let (product, warehouse) = (Uuid::new_v4(), Uuid::new_v4());

    assert!(matches!(
        h.engine.reserve(product, warehouse, 0, 60).await,
        Err(StockError::InvalidOperation(_))
    ));
    assert!(matches!(
        h.engine.reserve(product, warehouse, 5, 0).await,
        Err(StockError::InvalidOperation(_))
    ));
}

// The optimistic pre-check can pass on a stale cached value while the
// authoritative RESERVE fails; the reservation must then be rolled back so
// no ACTIVE row exists without a hold.
#[tokio::test]
async fn failed_reserve_rolls_back_reservation() {
    let h = harness();
    let (product, warehouse) = (Uuid::new_v4(), Uuid::new_v4());
    seed(&h.engine, product, warehouse, 10).await;

    // Poison the cache with a stale, too-high availability.
    AvailabilityCache::new(h.cache.clone(), Duration::from_secs(300))
        .put(product, Some(warehouse), 50)
        .await
        .unwrap();

    let err = h.engine.reserve(product, warehouse, 30, 60).await.unwrap_err();
    assert!(matches!(err, StockError::InsufficientStock { .. }));

    let all = h.reservations.all().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, ReservationStatus::Cancelled);

    let record = h
        .engine
        .get_stock_record(product, warehouse)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.reserved, 0);
}

#[tokio::test]
async fn cancel_releases_hold_once() {
    let h = harness();
    let (product, warehouse) = (Uuid::new_v4(), Uuid::new_v4());
    seed(&h.engine, product, warehouse, 100).await;

    let reservation = h.engine.reserve(product, warehouse, 25, 60).await.unwrap();
    let cancelled = h.engine.cancel_reservation(reservation.id).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert!(cancelled.status.is_terminal());

    let record = h
        .engine
        .get_stock_record(product, warehouse)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.reserved, 0);
    assert_eq!(record.available(), 100);

    // terminal state: a second cancel is absorbed without another release
    let again = h.engine.cancel_reservation(reservation.id).await.unwrap();
    assert_eq!(again.status, ReservationStatus::Cancelled);

    let history = h.engine.history(product, warehouse, 10).await.unwrap();
    let releases = history.iter().filter(|u| u.kind == "RELEASE").count();
    assert_eq!(releases, 1);
    assert_eq!(
        history
            .iter()
            .find(|u| u.kind == "RELEASE")
            .unwrap()
            .reference_id,
        Some(reservation.id)
    );
}

#[tokio::test]
async fn cancel_unknown_reservation_is_not_found() {
    let h = harness();
    let err = h.engine.cancel_reservation(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, StockError::NotFound(_)));
}

#[tokio::test]
async fn expiry_releases_hold_and_marks_reservation_expired() {
    let h = harness();
    let (product, warehouse) = (Uuid::new_v4(), Uuid::new_v4());
    seed(&h.engine, product, warehouse, 100).await;

    let reservation = h.engine.reserve(product, warehouse, 20, 1).await.unwrap();
    assert_eq!(
        h.engine
            .get_available_stock(product, Some(warehouse))
            .await
            .unwrap(),
        80
    );

    // not yet due
    assert_eq!(h.scheduler.sweep_once().await, 0);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(h.scheduler.sweep_once().await, 1);

    let expired = h.engine.get_reservation(reservation.id).await.unwrap();
    assert_eq!(expired.status, ReservationStatus::Expired);
    assert_eq!(
        h.engine
            .get_available_stock(product, Some(warehouse))
            .await
            .unwrap(),
        100
    );

    // firing again is a no-op
    assert_eq!(h.scheduler.sweep_once().await, 0);
}

#[tokio::test]
async fn cancellation_beats_expiry_and_the_timer_is_absorbed() {
    let h = harness();
    let (product, warehouse) = (Uuid::new_v4(), Uuid::new_v4());
    seed(&h.engine, product, warehouse, 50).await;

    let reservation = h.engine.reserve(product, warehouse, 10, 1).await.unwrap();
    h.engine.cancel_reservation(reservation.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(h.scheduler.sweep_once().await, 0);

    let final_state = h.engine.get_reservation(reservation.id).await.unwrap();
    assert_eq!(final_state.status, ReservationStatus::Cancelled);

    let history = h.engine.history(product, warehouse, 10).await.unwrap();
    assert_eq!(history.iter().filter(|u| u.kind == "RELEASE").count(), 1);
}

/// Delegates to the in-memory ledger but fails the next `failures` RELEASE
/// applies with a transient error.
struct FlakyReleaseLedger {
    inner: InMemoryLedgerStore,
    failures_left: AtomicUsize,
}

impl FlakyReleaseLedger {
    fn new(failures: usize) -> Self {
        Self {
            inner: InMemoryLedgerStore::new(5),
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl LedgerStore for FlakyReleaseLedger {
    async fn apply(&self, request: &OperationRequest) -> Result<AppliedOperation, StockError> {
        if request.kind == OperationKind::Release {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StockError::TransientStore("connection reset".to_string()));
            }
        }
        self.inner.apply(request).await
    }

    async fn get(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Option<StockRecord>, StockError> {
        self.inner.get(product_id, warehouse_id).await
    }

    async fn available(
        &self,
        product_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> Result<i64, StockError> {
        self.inner.available(product_id, warehouse_id).await
    }

    async fn history(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        limit: i64,
    ) -> Result<Vec<StockUpdateRecord>, StockError> {
        self.inner.history(product_id, warehouse_id, limit).await
    }

    async fn set_low_stock_threshold(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        threshold: i32,
    ) -> Result<(), StockError> {
        self.inner
            .set_low_stock_threshold(product_id, warehouse_id, threshold)
            .await
    }

    async fn deactivate(&self, product_id: Uuid, warehouse_id: Uuid) -> Result<(), StockError> {
        self.inner.deactivate(product_id, warehouse_id).await
    }
}

fn harness_with_ledger(ledger: Arc<dyn LedgerStore>) -> Harness {
    let reservations = Arc::new(InMemoryReservationStore::new());
    let cache = Arc::new(InMemoryCacheStore::new());
    let engine = Arc::new(StockEngine::new(
        ledger,
        reservations.clone(),
        AvailabilityCache::new(cache.clone(), Duration::from_secs(300)),
        Arc::new(MemoryEventSink::new()),
    ));
    let scheduler =
        ExpiryScheduler::new(engine.clone(), reservations.clone(), Duration::from_secs(60));
    Harness {
        engine,
        reservations,
        cache,
        scheduler,
    }
}

// A failed RELEASE must not leave the reservation terminal with its hold
// still in place: the cancel surfaces the error, puts the reservation back
// to ACTIVE, and a retried cancel releases the stock.
#[tokio::test]
async fn failed_release_reinstates_reservation_for_retried_cancel() {
    // Three transient failures exhaust one cancel's internal retries.
    let h = harness_with_ledger(Arc::new(FlakyReleaseLedger::new(3)));
    let (product, warehouse) = (Uuid::new_v4(), Uuid::new_v4());
    seed(&h.engine, product, warehouse, 100).await;

    let reservation = h.engine.reserve(product, warehouse, 20, 60).await.unwrap();

    let err = h.engine.cancel_reservation(reservation.id).await.unwrap_err();
    assert!(matches!(err, StockError::TransientStore(_)));

    let reinstated = h.engine.get_reservation(reservation.id).await.unwrap();
    assert_eq!(reinstated.status, ReservationStatus::Active);

    let cancelled = h.engine.cancel_reservation(reservation.id).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);

    let record = h
        .engine
        .get_stock_record(product, warehouse)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.reserved, 0);

    let history = h.engine.history(product, warehouse, 10).await.unwrap();
    assert_eq!(history.iter().filter(|u| u.kind == "RELEASE").count(), 1);
}

#[tokio::test]
async fn failed_release_during_sweep_is_retried_on_the_next_sweep() {
    let h = harness_with_ledger(Arc::new(FlakyReleaseLedger::new(3)));
    let (product, warehouse) = (Uuid::new_v4(), Uuid::new_v4());
    seed(&h.engine, product, warehouse, 30).await;

    let reservation = h.engine.reserve(product, warehouse, 30, 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    // Release fails; the reservation goes back to ACTIVE instead of sitting
    // EXPIRED with the stock still held.
    assert_eq!(h.scheduler.sweep_once().await, 0);
    let pending = h.engine.get_reservation(reservation.id).await.unwrap();
    assert_eq!(pending.status, ReservationStatus::Active);

    assert_eq!(h.scheduler.sweep_once().await, 1);
    let expired = h.engine.get_reservation(reservation.id).await.unwrap();
    assert_eq!(expired.status, ReservationStatus::Expired);
    assert_eq!(
        h.engine
            .get_available_stock(product, Some(warehouse))
            .await
            .unwrap(),
        30
    );
}

/// Every transition attempt fails; `due` keeps returning the same rows.
struct FailingTransitionStore {
    inner: InMemoryReservationStore,
}

#[async_trait]
impl ReservationStore for FailingTransitionStore {
    async fn insert(&self, reservation: &Reservation) -> Result<(), StockError> {
        self.inner.insert(reservation).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, StockError> {
        self.inner.get(id).await
    }

    async fn transition(
        &self,
        _id: Uuid,
        _from: ReservationStatus,
        _to: ReservationStatus,
    ) -> Result<Option<Reservation>, StockError> {
        Err(StockError::TransientStore("connection reset".to_string()))
    }

    async fn due(
        &self,
        as_of: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Reservation>, StockError> {
        self.inner.due(as_of, limit).await
    }
}

// A full batch of due rows that cannot be transitioned must not pin the
// sweeper in a refetch loop; the pass ends and the stragglers wait for the
// next scheduled sweep.
#[tokio::test]
async fn sweep_terminates_when_a_full_batch_makes_no_progress() {
    let reservations = Arc::new(FailingTransitionStore {
        inner: InMemoryReservationStore::new(),
    });
    let ledger = Arc::new(InMemoryLedgerStore::new(5));
    let engine = Arc::new(StockEngine::new(
        ledger,
        reservations.clone(),
        AvailabilityCache::new(Arc::new(InMemoryCacheStore::new()), Duration::from_secs(300)),
        Arc::new(MemoryEventSink::new()),
    ));
    let scheduler = ExpiryScheduler::new(engine, reservations.clone(), Duration::from_secs(60));

    // Enough overdue rows to fill a sweep batch.
    for _ in 0..120 {
        let mut reservation = Reservation::new(Uuid::new_v4(), Uuid::new_v4(), 1, 1);
        reservation.expires_at = Utc::now() - chrono::Duration::seconds(5);
        reservations.insert(&reservation).await.unwrap();
    }

    assert_eq!(scheduler.sweep_once().await, 0);
}

#[tokio::test]
async fn startup_recovery_executes_overdue_expiry() {
    let h = harness();
    let (product, warehouse) = (Uuid::new_v4(), Uuid::new_v4());
    seed(&h.engine, product, warehouse, 30).await;

    h.engine.reserve(product, warehouse, 30, 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    // Simulates a restart: the sweep at startup picks up the overdue hold.
    h.scheduler.recover().await;
    assert_eq!(
        h.engine
            .get_available_stock(product, Some(warehouse))
            .await
            .unwrap(),
        30
    );
}
