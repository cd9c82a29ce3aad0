use super::{CacheBackend, CacheError};
use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use moka::Expiry;
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};

/// A serialized cache entry together with the lifetime it was stored with.
#[derive(Clone)]
struct Entry {
    payload: String,
    ttl_secs: u64,
}

/// Expiry policy that honours the per-entry TTL carried by [`Entry`].
struct PerEntryExpiry;

impl Expiry<String, Entry> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(Duration::from_secs(value.ttl_secs))
    }
}

#[derive(Clone)]
pub struct InMemoryCache {
    cache: MokaCache<String, Entry>,
    default_ttl_secs: u64,
}

impl InMemoryCache {
    /// Initialize a new in-memory cache instance
    pub fn new(default_ttl_secs: u64, capacity_mib: usize) -> Result<Self, String> {
        // Convert MiB to bytes for max_capacity (1 MiB = 1024 * 1024 bytes)
        let max_capacity_bytes: u64 = (capacity_mib * 1024 * 1024)
            .try_into()
            .map_err(|_| "Capacity overflow".to_string())?;

        let cache = MokaCache::builder()
            .expire_after(PerEntryExpiry)
            .weigher(|_key, value: &Entry| -> u32 {
                value.payload.len().try_into().unwrap_or(u32::MAX)
            })
            .max_capacity(max_capacity_bytes)
            .build();

        Ok(Self {
            cache,
            default_ttl_secs,
        })
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value)?;
        let ttl_secs = if ttl_secs == 0 {
            self.default_ttl_secs
        } else {
            ttl_secs
        };
        self.cache
            .insert(key.to_string(), Entry { payload, ttl_secs })
            .await;
        Ok(())
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        if let Some(entry) = self.cache.get(key).await {
            serde_json::from_str(&entry.payload)
                .map_err(|e| CacheError::Deserialization(e.to_string()))
                .map(Some)
        } else {
            Ok(None)
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.remove(key).await;
        Ok(())
    }
}
