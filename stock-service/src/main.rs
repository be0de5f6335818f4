use axum::{routing::get, Router};
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use common_events::EventSink;
#[cfg(not(any(feature = "kafka", feature = "kafka-producer")))]
use common_events::NoopEventSink;
#[cfg(any(feature = "kafka", feature = "kafka-producer"))]
use common_events::{KafkaEventSink, KafkaEventSinkConfig};
#[cfg(any(feature = "kafka", feature = "kafka-producer"))]
use rdkafka::producer::FutureProducer;

use stock_service::{
    AvailabilityCache, CacheStore, ExpiryScheduler, InMemoryCacheStore, PgLedgerStore,
    PgReservationStore, RedisCacheStore, StockConfig, StockEngine,
};

async fn health() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = StockConfig::from_env()?;

    let db_pool = PgPool::connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    let cache_store: Arc<dyn CacheStore> = match &config.redis_url {
        Some(url) => {
            info!("Using Redis availability cache");
            Arc::new(RedisCacheStore::new(url).await?)
        }
        None => {
            info!("REDIS_URL not set; using in-process availability cache");
            Arc::new(InMemoryCacheStore::new())
        }
    };
    let cache = AvailabilityCache::new(cache_store, config.cache_ttl);

    #[cfg(any(feature = "kafka", feature = "kafka-producer"))]
    let events: Arc<dyn EventSink> = {
        let producer: FutureProducer = rdkafka::ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_bootstrap)
            .create()
            .expect("failed to create kafka producer");
        Arc::new(KafkaEventSink::new(
            producer,
            KafkaEventSinkConfig {
                operation_topic: config.operation_topic.clone(),
                low_stock_topic: config.low_stock_topic.clone(),
            },
        ))
    };
    #[cfg(not(any(feature = "kafka", feature = "kafka-producer")))]
    let events: Arc<dyn EventSink> = Arc::new(NoopEventSink);

    let ledger = Arc::new(PgLedgerStore::new(
        db_pool.clone(),
        config.default_low_stock_threshold,
    ));
    let reservations = Arc::new(PgReservationStore::new(db_pool.clone()));
    let engine = Arc::new(StockEngine::new(
        ledger,
        reservations.clone(),
        cache,
        events,
    ));

    let scheduler = Arc::new(ExpiryScheduler::new(
        engine.clone(),
        reservations,
        config.reservation_expiry_sweep,
    ));
    scheduler.recover().await;
    scheduler.spawn();

    let app = Router::new().route("/healthz", get(health));

    let ip: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((ip, config.port));
    info!(%addr, "starting stock-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
