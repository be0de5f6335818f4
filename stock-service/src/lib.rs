pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod expiry;
pub mod ledger;
pub mod model;
pub mod reservation_store;

pub use cache::{AvailabilityCache, CacheStore, InMemoryCacheStore, RedisCacheStore};
pub use config::{StockConfig, DEFAULT_LOW_STOCK_THRESHOLD, DEFAULT_RESERVATION_TTL_SECS};
pub use engine::{OperationOutcome, StockEngine};
pub use error::{SideEffectWarning, StockError};
pub use expiry::ExpiryScheduler;
pub use ledger::{AppliedOperation, InMemoryLedgerStore, LedgerStore, PgLedgerStore};
pub use model::{
    OperationKind, OperationRequest, Reservation, ReservationStatus, StockRecord,
    StockUpdateRecord,
};
pub use reservation_store::{InMemoryReservationStore, PgReservationStore, ReservationStore};
