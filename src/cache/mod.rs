use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod memory;
pub mod null;
pub mod redis;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to parse value: {0}")]
    Deserialization(String),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Cache trait defining the interface for all cache implementations.
///
/// Entries carry their own time-to-live because the objects stored here
/// (nonces, states, protection tokens) have very different lifetimes.
/// Implementations must be thread-safe (Send + Sync) and cloneable so the
/// cache can be shared across handlers.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Store a value in the cache with a per-entry TTL in seconds
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), CacheError>;

    /// Retrieve a value from the cache
    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError>;

    /// Performs a deep health check on the cache backend
    ///
    /// For Redis this pings the server; for the in-memory backend it only
    /// confirms the cache is initialized.
    async fn health_check(&self) -> Result<(), String>;

    /// Delete a value from the cache
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Cache implementation that provides a uniform interface regardless of backend.
///
/// The concrete backend is chosen at runtime from configuration; handlers only
/// ever see this enum.
#[derive(Clone)]
pub enum Cache {
    /// In-memory cache implementation using Moka
    InMemory(memory::InMemoryCache),
    /// Redis-based cache implementation
    Redis(redis::RedisCache),
    /// No-op cache implementation that doesn't actually cache anything
    Null(null::NullCache),
}

#[async_trait::async_trait]
impl CacheBackend for Cache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        match self {
            Self::InMemory(cache) => cache.set(key, value, ttl_secs).await,
            Self::Redis(cache) => cache.set(key, value, ttl_secs).await,
            Self::Null(cache) => cache.set(key, value, ttl_secs).await,
        }
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self {
            Self::InMemory(cache) => cache.get(key).await,
            Self::Redis(cache) => cache.get(key).await,
            Self::Null(cache) => cache.get(key).await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::InMemory(cache) => cache.health_check().await,
            Self::Redis(cache) => cache.health_check().await,
            Self::Null(cache) => cache.health_check().await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match self {
            Self::InMemory(cache) => cache.delete(key).await,
            Self::Redis(cache) => cache.delete(key).await,
            Self::Null(cache) => cache.delete(key).await,
        }
    }
}

/// Factory function to create the appropriate cache implementation based on
/// configuration.
///
/// Note the anti-replay store sits on top of this cache and refuses to run
/// without real storage, so `none` is only usable for setups that keep every
/// flow stateless.
pub async fn create_cache(config: &crate::config::CacheConfig) -> Result<Cache, CacheError> {
    match config.store.as_str() {
        "in-memory" => {
            let cache = memory::InMemoryCache::new(config.ttl, config.memory_capacity)
                .map_err(CacheError::Config)?;
            Ok(Cache::InMemory(cache))
        }
        "redis" => {
            if config.redis_url.is_empty() {
                return Err(CacheError::Config(
                    "Redis URL is required for Redis cache".to_string(),
                ));
            }
            let cache = redis::RedisCache::new(&config.redis_url)
                .await
                .map_err(CacheError::Config)?;
            Ok(Cache::Redis(cache))
        }
        "none" => Ok(Cache::Null(null::NullCache::new())),
        other => Err(CacheError::Config(format!(
            "Unknown cache store '{other}', expected in-memory, redis or none"
        ))),
    }
}
