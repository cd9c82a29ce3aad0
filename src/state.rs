use crate::cache::Cache;
use crate::config::RpConfig;
use crate::discovery::DiscoveryService;
use crate::keys::OpKeyService;
use crate::persistence::{InMemoryRpStore, KeyedLocks, RpStore};
use crate::store::ExpiredObjectStore;
use crate::uma::decision::DecisionEngine;
use crate::uma::pat::PatLifecycle;
use crate::uma::registry::ResourceRegistry;
use crate::uma::rpt::RptService;
use http::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RpConfig>,
    pub store: Arc<ExpiredObjectStore>,
    pub rps: Arc<dyn RpStore>,
    pub discovery: Arc<DiscoveryService>,
    pub keys: Arc<OpKeyService>,
    pub pats: Arc<PatLifecycle>,
    pub registry: Arc<ResourceRegistry>,
    pub decisions: Arc<DecisionEngine>,
    pub rpts: Arc<RptService>,
}

impl AppState {
    /// HTTP client for calls to authorization servers
    fn create_as_client(config: &RpConfig) -> Result<Client, std::io::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        Client::builder()
            .timeout(Duration::from_secs(config.client.timeout))
            .connect_timeout(Duration::from_secs(config.client.connect_timeout))
            .default_headers(headers)
            // Configure connection pool
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| {
                std::io::Error::other(format!("Failed to create AS client: {}", e))
            })
    }

    pub async fn with_existing_cache(
        config: &RpConfig,
        cache: Cache,
    ) -> Result<Self, std::io::Error> {
        let http = Self::create_as_client(config)?;
        let store = Arc::new(ExpiredObjectStore::new(cache, &config.uma));
        let rps: Arc<dyn RpStore> = Arc::new(InMemoryRpStore::new());
        let locks = Arc::new(KeyedLocks::new());
        let discovery = Arc::new(DiscoveryService::new(
            http.clone(),
            config.uma.discovery_ttl,
        ));
        let keys = Arc::new(OpKeyService::new(http.clone(), discovery.clone()));
        let pats = Arc::new(PatLifecycle::new(
            http.clone(),
            store.clone(),
            discovery.clone(),
            rps.clone(),
            locks.clone(),
            config.uma.pat_max_ttl,
        ));
        let registry = Arc::new(ResourceRegistry::new(
            http.clone(),
            discovery.clone(),
            rps.clone(),
            pats.clone(),
            locks.clone(),
        ));
        let decisions = Arc::new(DecisionEngine::new(
            http.clone(),
            discovery.clone(),
            rps.clone(),
            pats.clone(),
            config.uma.realm.clone(),
        ));
        let rpts = Arc::new(RptService::new(http, discovery.clone(), rps.clone()));

        Ok(Self {
            config: Arc::new(config.clone()),
            store,
            rps,
            discovery,
            keys,
            pats,
            registry,
            decisions,
            rpts,
        })
    }
}
