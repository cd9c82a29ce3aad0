use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

/// Errors that can occur while resolving authorization server metadata
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Invalid issuer URL: {0}")]
    InvalidIssuer(#[from] url::ParseError),
    #[error("Failed to fetch discovery document: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Discovery request failed with status: {0}")]
    InvalidStatus(reqwest::StatusCode),
}

/// uma2-configuration document, reduced to the endpoints the proxy calls
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_registration_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims_interaction_endpoint: Option<String>,
}

struct CachedMetadata {
    fetched_at: Instant,
    metadata: Arc<OpMetadata>,
}

/// Fetches and caches uma2-configuration documents per issuer
pub struct DiscoveryService {
    http: Client,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedMetadata>>,
}

impl DiscoveryService {
    pub fn new(http: Client, ttl_secs: u64) -> Self {
        Self {
            http,
            ttl: Duration::from_secs(ttl_secs),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the metadata for an issuer, fetching at most once per TTL
    pub async fn metadata(&self, issuer: &str) -> Result<Arc<OpMetadata>, DiscoveryError> {
        let issuer = issuer.trim_end_matches('/');

        if let Some(entry) = self.cache.read().await.get(issuer) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.metadata.clone());
            }
        }

        let metadata = Arc::new(self.fetch(issuer).await?);
        self.cache.write().await.insert(
            issuer.to_string(),
            CachedMetadata {
                fetched_at: Instant::now(),
                metadata: metadata.clone(),
            },
        );
        Ok(metadata)
    }

    async fn fetch(&self, issuer: &str) -> Result<OpMetadata, DiscoveryError> {
        // Validates the issuer is an absolute URL before building the
        // well-known path from it
        let base = Url::parse(issuer)?;
        let url = format!(
            "{}/.well-known/uma2-configuration",
            base.as_str().trim_end_matches('/')
        );
        debug!("Fetching discovery document from {}", url);

        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::InvalidStatus(response.status()));
        }
        Ok(response.json().await?)
    }
}
