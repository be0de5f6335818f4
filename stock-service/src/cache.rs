use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

// Redis dependencies (only used by Redis implementation)
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Get/set/delete by string key with a per-entry time-to-live. Values are
/// advisory only; everything here is reconstructable from the ledger.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<i64>>;
    async fn put(&self, key: &str, value: i64, ttl: Duration) -> Result<()>;
    async fn delete(&self, keys: &[String]) -> Result<()>;
}

// ---------------- Redis Implementation ----------------

#[derive(Clone)]
pub struct RedisCacheStore {
    manager: ConnectionManager,
}

impl RedisCacheStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager")?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.manager.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let _: () = conn.del(keys).await?;
        Ok(())
    }
}

// ---------------- In-Memory Implementation (Tests / Local Dev) ----------------

#[derive(Default)]
pub struct InMemoryCacheStore {
    inner: Mutex<HashMap<String, (i64, Instant)>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut inner = self.inner.lock().await;
        match inner.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(*value)),
            Some(_) => {
                inner.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        self.inner
            .lock()
            .await
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for key in keys {
            inner.remove(key);
        }
        Ok(())
    }
}

// ---------------- Availability keyspace ----------------

pub fn product_key(product_id: Uuid) -> String {
    format!("stock:available:{product_id}")
}

pub fn warehouse_key(product_id: Uuid, warehouse_id: Uuid) -> String {
    format!("stock:available:{product_id}:{warehouse_id}")
}

/// Read-through cache of computed available stock, keyed per product and per
/// (product, warehouse). Invalidation happens only on a successful ledger
/// commit; staleness is otherwise bounded by the TTL.
#[derive(Clone)]
pub struct AvailabilityCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl AvailabilityCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(product_id: Uuid, warehouse_id: Option<Uuid>) -> String {
        match warehouse_id {
            Some(warehouse_id) => warehouse_key(product_id, warehouse_id),
            None => product_key(product_id),
        }
    }

    pub async fn get(&self, product_id: Uuid, warehouse_id: Option<Uuid>) -> Result<Option<i64>> {
        self.store.get(&Self::key(product_id, warehouse_id)).await
    }

    pub async fn put(
        &self,
        product_id: Uuid,
        warehouse_id: Option<Uuid>,
        value: i64,
    ) -> Result<()> {
        self.store
            .put(&Self::key(product_id, warehouse_id), value, self.ttl)
            .await
    }

    /// Drops every key whose value a commit against (product, warehouse) can
    /// have changed: the product aggregate plus the mutated warehouse entry.
    pub async fn invalidate(&self, product_id: Uuid, warehouse_id: Uuid) -> Result<()> {
        let keys = vec![
            product_key(product_id),
            warehouse_key(product_id, warehouse_id),
        ];
        self.store.delete(&keys).await
    }
}
