use crate::models::Rp;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Errors that can occur against the RP persistence collaborator
#[derive(Debug, Error)]
pub enum RpStoreError {
    #[error("Unknown rp_id: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Persistence collaborator owning the relying-party records.
///
/// Provides at-least read-after-write consistency per `rp_id`; callers that
/// read-modify-write the resource list must additionally hold the per-RP
/// lock from [`KeyedLocks`].
#[async_trait]
pub trait RpStore: Send + Sync {
    async fn load(&self, rp_id: &str) -> Result<Rp, RpStoreError>;
    async fn save(&self, rp: Rp) -> Result<(), RpStoreError>;
    async fn delete(&self, rp_id: &str) -> Result<(), RpStoreError>;
}

/// In-memory RP store
#[derive(Default)]
pub struct InMemoryRpStore {
    records: RwLock<HashMap<String, Rp>>,
}

impl InMemoryRpStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RpStore for InMemoryRpStore {
    async fn load(&self, rp_id: &str) -> Result<Rp, RpStoreError> {
        self.records
            .read()
            .await
            .get(rp_id)
            .cloned()
            .ok_or_else(|| RpStoreError::NotFound(rp_id.to_string()))
    }

    async fn save(&self, rp: Rp) -> Result<(), RpStoreError> {
        self.records.write().await.insert(rp.rp_id.clone(), rp);
        Ok(())
    }

    async fn delete(&self, rp_id: &str) -> Result<(), RpStoreError> {
        self.records
            .write()
            .await
            .remove(rp_id)
            .map(|_| ())
            .ok_or_else(|| RpStoreError::NotFound(rp_id.to_string()))
    }
}

/// Per-key async mutex map.
///
/// Serializes resource-list read-modify-write and PAT refresh per `rp_id`
/// without any global ordering across RPs. Locks are created lazily and
/// kept for the lifetime of the process; the set of RPs is small compared
/// to the sessions flowing through them.
#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting if another task holds it
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
