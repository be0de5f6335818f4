pub mod model;
pub mod producer;

pub use model::{EventError, EventResult, LowStockAlert, StockOperationEvent, EVENT_SCHEMA_VERSION};
pub use producer::{EventSink, MemoryEventSink, NoopEventSink};
#[cfg(any(feature = "kafka", feature = "kafka-producer"))]
pub use producer::{KafkaEventSink, KafkaEventSinkConfig};
