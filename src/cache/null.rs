use super::{CacheBackend, CacheError};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// NullCache is a cache implementation that does nothing.
/// It can be used when caching is disabled but the cache interface is still
/// required. Anti-replay validation cannot work on top of it, since nothing
/// stored here is ever found again.
#[derive(Clone, Debug)]
pub struct NullCache;

impl NullCache {
    /// Create a new NullCache instance
    pub fn new() -> Self {
        NullCache
    }
}

impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        _key: &str,
        _value: &T,
        _ttl_secs: u64,
    ) -> Result<(), CacheError> {
        // Do nothing
        Ok(())
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        _key: &str,
    ) -> Result<Option<T>, CacheError> {
        // Always return None
        Ok(None)
    }

    async fn health_check(&self) -> Result<(), String> {
        // NullCache is always healthy as it doesn't interact with any external systems
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        // Do nothing
        Ok(())
    }
}
