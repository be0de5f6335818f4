use crate::{EventResult, LowStockAlert, StockOperationEvent};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Best-effort outbound sink for stock events. Delivery failures are the
/// caller's concern to surface; a sink must never panic.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish_operation(&self, event: &StockOperationEvent) -> EventResult<()>;
    async fn publish_low_stock(&self, alert: &LowStockAlert) -> EventResult<()>;
}

/// Sink that drops everything. Default when no broker is configured.
#[derive(Debug, Default, Clone)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn publish_operation(&self, event: &StockOperationEvent) -> EventResult<()> {
        tracing::debug!(event_id = %event.event_id, kind = %event.kind, "event sink not configured; dropping operation event");
        Ok(())
    }

    async fn publish_low_stock(&self, alert: &LowStockAlert) -> EventResult<()> {
        tracing::debug!(product_id = %alert.product_id, "event sink not configured; dropping low-stock alert");
        Ok(())
    }
}

/// Capturing sink for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    operations: Mutex<Vec<StockOperationEvent>>,
    low_stock: Mutex<Vec<LowStockAlert>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn operations(&self) -> Vec<StockOperationEvent> {
        self.operations.lock().await.clone()
    }

    pub async fn low_stock(&self) -> Vec<LowStockAlert> {
        self.low_stock.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish_operation(&self, event: &StockOperationEvent) -> EventResult<()> {
        self.operations.lock().await.push(event.clone());
        Ok(())
    }

    async fn publish_low_stock(&self, alert: &LowStockAlert) -> EventResult<()> {
        self.low_stock.lock().await.push(alert.clone());
        Ok(())
    }
}

#[cfg(any(feature = "kafka", feature = "kafka-producer"))]
mod kafka {
    use super::*;
    use crate::EventError;
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use std::time::Duration;

    #[derive(Clone)]
    pub struct KafkaEventSinkConfig {
        pub operation_topic: String,
        pub low_stock_topic: String,
    }

    #[derive(Clone)]
    pub struct KafkaEventSink {
        producer: FutureProducer,
        config: KafkaEventSinkConfig,
    }

    impl KafkaEventSink {
        pub fn new(producer: FutureProducer, config: KafkaEventSinkConfig) -> Self {
            Self { producer, config }
        }

        async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> EventResult<()> {
            let record = FutureRecord::to(topic).key(key).payload(payload);
            if let Err((err, _)) = self.producer.send(record, Duration::from_secs(5)).await {
                return Err(EventError::Kafka(err.to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EventSink for KafkaEventSink {
        async fn publish_operation(&self, event: &StockOperationEvent) -> EventResult<()> {
            let payload =
                serde_json::to_vec(event).map_err(|e| EventError::Serialization(e.to_string()))?;
            let key = event.product_id.to_string();
            self.send(&self.config.operation_topic, &key, &payload).await
        }

        async fn publish_low_stock(&self, alert: &LowStockAlert) -> EventResult<()> {
            let payload =
                serde_json::to_vec(alert).map_err(|e| EventError::Serialization(e.to_string()))?;
            let key = alert.product_id.to_string();
            self.send(&self.config.low_stock_topic, &key, &payload).await
        }
    }
}

#[cfg(any(feature = "kafka", feature = "kafka-producer"))]
pub use kafka::{KafkaEventSink, KafkaEventSinkConfig};
