use crate::discovery::{DiscoveryError, DiscoveryService};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::DecodingKey;
use log::{debug, warn};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors that can occur while resolving signature-verification keys
#[derive(Debug, Error)]
pub enum KeyError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("Failed to fetch JWKS: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("JWKS request failed with status: {0}")]
    InvalidStatus(reqwest::StatusCode),
    #[error("No keys published at issuer {0}")]
    NoKeys(String),
    #[error("Token kid is required when multiple JWKS keys are present")]
    MissingKid,
    #[error("No JWKS key found for kid: {0}")]
    KeyNotFound(String),
    #[error("Unusable JWK: {0}")]
    InvalidKey(#[from] jsonwebtoken::errors::Error),
}

/// Fetches and caches an authorization server's signature-verification keys,
/// keyed by issuer.
///
/// A kid-miss invalidates the cached set and triggers exactly one refetch,
/// so AS key rotation costs at most one extra round trip.
pub struct OpKeyService {
    http: Client,
    discovery: Arc<DiscoveryService>,
    cache: RwLock<HashMap<String, Arc<JwkSet>>>,
}

impl OpKeyService {
    pub fn new(http: Client, discovery: Arc<DiscoveryService>) -> Self {
        Self {
            http,
            discovery,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the verification key for `(issuer, kid)`
    pub async fn signing_key(
        &self,
        issuer: &str,
        kid: Option<&str>,
    ) -> Result<DecodingKey, KeyError> {
        let jwks = self.jwks(issuer).await?;
        match select_jwk(&jwks, kid) {
            Ok(jwk) => Ok(DecodingKey::from_jwk(jwk)?),
            Err(err @ (KeyError::KeyNotFound(_) | KeyError::MissingKid)) => {
                // The requested kid is not in the cached set: the AS may
                // have rotated its keys. Invalidate and refetch once.
                warn!(
                    "Key lookup at {} failed ({}), refreshing JWKS",
                    issuer, err
                );
                self.cache.write().await.remove(issuer);
                let jwks = self.jwks(issuer).await?;
                let jwk = select_jwk(&jwks, kid)?;
                Ok(DecodingKey::from_jwk(jwk)?)
            }
            Err(err) => Err(err),
        }
    }

    async fn jwks(&self, issuer: &str) -> Result<Arc<JwkSet>, KeyError> {
        if let Some(jwks) = self.cache.read().await.get(issuer) {
            return Ok(jwks.clone());
        }

        let metadata = self.discovery.metadata(issuer).await?;
        debug!("Fetching JWKS from {}", metadata.jwks_uri);
        let response = self.http.get(&metadata.jwks_uri).send().await?;
        if !response.status().is_success() {
            return Err(KeyError::InvalidStatus(response.status()));
        }
        let jwks: JwkSet = response.json().await?;
        if jwks.keys.is_empty() {
            return Err(KeyError::NoKeys(issuer.to_string()));
        }

        let jwks = Arc::new(jwks);
        self.cache
            .write()
            .await
            .insert(issuer.to_string(), jwks.clone());
        Ok(jwks)
    }
}

fn select_jwk<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Result<&'a Jwk, KeyError> {
    match kid {
        Some(kid) => jwks
            .find(kid)
            .ok_or_else(|| KeyError::KeyNotFound(kid.to_string())),
        None if jwks.keys.len() == 1 => Ok(&jwks.keys[0]),
        None => Err(KeyError::MissingKid),
    }
}
