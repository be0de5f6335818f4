use thiserror::Error;
use uuid::Uuid;

/// Typed failures surfaced by the accounting and reservation engines.
///
/// Business-rule rejections (`InsufficientStock`, `InvalidRelease`,
/// `InvalidOperation`) are final and must not be retried automatically.
/// `TransientStore` aborts the whole operation with no partial state; callers
/// may retry it with the same reference id.
#[derive(Debug, Error)]
pub enum StockError {
    #[error("insufficient stock for product {product_id} (requested {requested}, available {available})")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },
    #[error("release of {requested} exceeds reserved {reserved} for product {product_id}")]
    InvalidRelease {
        product_id: Uuid,
        requested: i32,
        reserved: i32,
    },
    #[error("invalid stock operation: {0}")]
    InvalidOperation(String),
    #[error("reservation {0} not found")]
    NotFound(Uuid),
    #[error("transient store failure: {0}")]
    TransientStore(String),
}

impl From<sqlx::Error> for StockError {
    fn from(err: sqlx::Error) -> Self {
        StockError::TransientStore(err.to_string())
    }
}

/// Non-fatal failure of a post-commit side effect. The stock mutation is
/// already durable when one of these is raised; it is reported alongside the
/// successful outcome instead of failing the call.
#[derive(Debug, Clone)]
pub enum SideEffectWarning {
    CacheInvalidation(String),
    LowStockSignal(String),
    Notification(String),
}

impl std::fmt::Display for SideEffectWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SideEffectWarning::CacheInvalidation(msg) => {
                write!(f, "cache invalidation failed: {msg}")
            }
            SideEffectWarning::LowStockSignal(msg) => write!(f, "low-stock signal failed: {msg}"),
            SideEffectWarning::Notification(msg) => {
                write!(f, "operation notification failed: {msg}")
            }
        }
    }
}
