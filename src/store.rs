use crate::cache::{Cache, CacheBackend, CacheError};
use crate::config::UmaConfig;
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors that can occur in the expired-object store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Kind of a stored one-shot object. The kind participates in key
/// derivation, so a value can never be mistaken for the wrong type of
/// anti-replay token.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Nonce,
    State,
    Pat,
    RequestObject,
}

impl ObjectType {
    fn prefix(self) -> &'static str {
        match self {
            ObjectType::Nonce => "nonce",
            ObjectType::State => "state",
            ObjectType::Pat => "pat",
            ObjectType::RequestObject => "request_object",
        }
    }
}

/// A stored object together with its logical expiry.
///
/// The cache backend evicts on its own clock; `expires_at` is the
/// authoritative lifetime and is enforced on every read.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExpiredObject {
    pub value: String,
    pub object_type: ObjectType,
    pub expires_at: i64,
}

/// TTL key/value store for nonces, states, cached PATs and one-shot request
/// objects. Entries for distinct keys are independent; there is no ordering
/// guarantee across keys.
#[derive(Clone)]
pub struct ExpiredObjectStore {
    cache: Cache,
    nonce_ttl: u64,
    state_ttl: u64,
    request_object_ttl: u64,
}

impl ExpiredObjectStore {
    pub fn new(cache: Cache, config: &UmaConfig) -> Self {
        Self {
            cache,
            nonce_ttl: config.nonce_ttl,
            state_ttl: config.state_ttl,
            request_object_ttl: config.request_object_ttl,
        }
    }

    /// Derive the cache key for a (type, value) pair: type prefix plus a
    /// truncated sha256 of the value.
    fn derive_key(object_type: ObjectType, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        format!("{}:{}", object_type.prefix(), &hash[..16])
    }

    /// Default TTL for a type, used when the caller does not supply one.
    /// PATs always carry an explicit TTL derived from the AS response.
    pub fn default_ttl(&self, object_type: ObjectType) -> u64 {
        match object_type {
            ObjectType::Nonce => self.nonce_ttl,
            ObjectType::State => self.state_ttl,
            ObjectType::RequestObject => self.request_object_ttl,
            ObjectType::Pat => 0,
        }
    }

    /// Store a keyed payload (the key is derived from `key_value`, the
    /// stored value is `payload`). Returns the derived cache key.
    pub async fn put_keyed(
        &self,
        object_type: ObjectType,
        key_value: &str,
        payload: String,
        ttl_secs: u64,
    ) -> Result<String, StoreError> {
        let key = Self::derive_key(object_type, key_value);
        let object = ExpiredObject {
            value: payload,
            object_type,
            expires_at: Utc::now().timestamp() + ttl_secs as i64,
        };
        self.cache.set(&key, &object, ttl_secs).await?;
        debug!(
            "Stored {} object under {} with ttl {}s",
            object_type.prefix(),
            key,
            ttl_secs
        );
        Ok(key)
    }

    /// Store a self-keyed value (nonces and states key themselves)
    pub async fn put(
        &self,
        object_type: ObjectType,
        value: &str,
        ttl_secs: u64,
    ) -> Result<String, StoreError> {
        self.put_keyed(object_type, value, value.to_string(), ttl_secs)
            .await
    }

    /// Retrieve an object, enforcing the logical expiry. Expired entries
    /// are removed and reported as absent.
    pub async fn get(
        &self,
        object_type: ObjectType,
        key_value: &str,
    ) -> Result<Option<ExpiredObject>, StoreError> {
        let key = Self::derive_key(object_type, key_value);
        let Some(object) = self.cache.get::<ExpiredObject>(&key).await? else {
            return Ok(None);
        };
        if Utc::now().timestamp() >= object.expires_at {
            debug!("Entry {} expired, removing", key);
            self.cache.delete(&key).await?;
            return Ok(None);
        }
        Ok(Some(object))
    }

    /// Whether an unexpired entry exists for this (type, value) pair
    pub async fn exists(
        &self,
        object_type: ObjectType,
        key_value: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.get(object_type, key_value).await?.is_some())
    }

    pub async fn delete(
        &self,
        object_type: ObjectType,
        key_value: &str,
    ) -> Result<(), StoreError> {
        let key = Self::derive_key(object_type, key_value);
        self.cache.delete(&key).await?;
        Ok(())
    }

    /// Deep health check of the backing cache
    pub async fn health_check(&self) -> Result<(), String> {
        self.cache.health_check().await
    }

    /// Retrieve and delete in one step, for single-use objects. Returns the
    /// stored object only if it existed unexpired.
    pub async fn consume(
        &self,
        object_type: ObjectType,
        key_value: &str,
    ) -> Result<Option<ExpiredObject>, StoreError> {
        let object = self.get(object_type, key_value).await?;
        if object.is_some() {
            self.delete(object_type, key_value).await?;
        }
        Ok(object)
    }
}
