use crate::discovery::DiscoveryService;
use crate::models::TokenResponse;
use crate::persistence::{KeyedLocks, RpStore};
use crate::store::{ExpiredObjectStore, ObjectType};
use crate::uma::{call_as_json, AsAuth, Payload, UmaError};
use chrono::Utc;
use log::{debug, info, warn};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A protection API token for one RP, cached in the expired-object store
/// keyed by the RP id
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Pat {
    pub token: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Obtains and caches PATs via the client-credentials grant with the
/// `uma_protection` scope. Fetches for the same RP are serialized through
/// a per-RP lock so concurrent callers share one round trip to the AS.
pub struct PatLifecycle {
    http: Client,
    store: Arc<ExpiredObjectStore>,
    discovery: Arc<DiscoveryService>,
    rps: Arc<dyn RpStore>,
    locks: Arc<KeyedLocks>,
    max_ttl: u64,
}

impl PatLifecycle {
    pub fn new(
        http: Client,
        store: Arc<ExpiredObjectStore>,
        discovery: Arc<DiscoveryService>,
        rps: Arc<dyn RpStore>,
        locks: Arc<KeyedLocks>,
        max_ttl: u64,
    ) -> Self {
        Self {
            http,
            store,
            discovery,
            rps,
            locks,
            max_ttl,
        }
    }

    /// Return the cached PAT for the RP, fetching a new one if none is
    /// cached or the cached one has expired
    pub async fn get(&self, rp_id: &str) -> Result<Pat, UmaError> {
        if let Some(pat) = self.cached(rp_id).await? {
            return Ok(pat);
        }
        let _guard = self.locks.acquire(&lock_key(rp_id)).await;
        // another caller may have fetched while we waited for the lock
        if let Some(pat) = self.cached(rp_id).await? {
            return Ok(pat);
        }
        self.fetch_and_cache(rp_id).await
    }

    /// Discard the cached PAT and fetch a fresh one.
    ///
    /// `stale` is the token the caller saw rejected. If the cache already
    /// holds a different token by the time the lock is acquired, another
    /// caller refreshed first and that token is returned without a second
    /// round trip to the AS.
    pub async fn force_refresh(&self, rp_id: &str, stale: Option<&str>) -> Result<Pat, UmaError> {
        let _guard = self.locks.acquire(&lock_key(rp_id)).await;
        if let Some(cached) = self.cached(rp_id).await? {
            match stale {
                Some(stale) if cached.token == stale => {}
                _ => {
                    debug!("PAT for {} already refreshed by a concurrent caller", rp_id);
                    return Ok(cached);
                }
            }
        }
        self.store.delete(ObjectType::Pat, rp_id).await?;
        self.fetch_and_cache(rp_id).await
    }

    async fn cached(&self, rp_id: &str) -> Result<Option<Pat>, UmaError> {
        let Some(object) = self.store.get(ObjectType::Pat, rp_id).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&object.value) {
            Ok(pat) => Ok(Some(pat)),
            Err(err) => {
                // unreadable cache entry, treat as a miss and refetch
                warn!("Discarding unreadable cached PAT for {}: {}", rp_id, err);
                self.store.delete(ObjectType::Pat, rp_id).await?;
                Ok(None)
            }
        }
    }

    async fn fetch_and_cache(&self, rp_id: &str) -> Result<Pat, UmaError> {
        let rp = self.rps.load(rp_id).await?;
        let metadata = self.discovery.metadata(&rp.op_host).await?;

        let form = [
            ("grant_type", "client_credentials".to_string()),
            ("scope", "uma_protection".to_string()),
        ];
        let response: TokenResponse = call_as_json(
            &self.http,
            Method::POST,
            &metadata.token_endpoint,
            AsAuth::Basic {
                id: &rp.client_id,
                secret: &rp.client_secret,
            },
            Payload::Form(&form),
        )
        .await?;

        let ttl = response
            .expires_in
            .map(|expires_in| expires_in.min(self.max_ttl))
            .unwrap_or(self.max_ttl);
        let now = Utc::now().timestamp();
        let pat = Pat {
            token: response.access_token,
            issued_at: now,
            expires_at: now + ttl as i64,
        };
        self.store
            .put_keyed(ObjectType::Pat, rp_id, serde_json::to_string(&pat)?, ttl)
            .await?;
        info!("Obtained PAT for {} (ttl {}s)", rp_id, ttl);
        Ok(pat)
    }
}

fn lock_key(rp_id: &str) -> String {
    format!("pat:{rp_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCache;
    use crate::cache::Cache;
    use crate::models::Rp;
    use crate::persistence::InMemoryRpStore;
    use crate::uma::with_pat_retry;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn fixture(server: &MockServer) -> (PatLifecycle, String) {
        let config = crate::config::RpConfig::for_tests();
        let cache = Cache::InMemory(InMemoryCache::new(3600, 16).expect("cache"));
        let store = Arc::new(ExpiredObjectStore::new(cache, &config.uma));
        let rps = Arc::new(InMemoryRpStore::new());
        let rp = Rp {
            rp_id: "rp-1".to_string(),
            op_host: server.uri(),
            client_id: "client-1".to_string(),
            client_secret: "secret-1".to_string(),
            scope: vec!["openid".to_string()],
            response_types: vec!["code".to_string()],
            redirect_uris: vec!["https://rp.example.com/cb".to_string()],
            uma_resources: vec![],
        };
        rps.save(rp).await.expect("save failed");
        let lifecycle = PatLifecycle::new(
            Client::new(),
            store,
            Arc::new(DiscoveryService::new(Client::new(), 3600)),
            rps,
            Arc::new(KeyedLocks::new()),
            3600,
        );
        (lifecycle, "rp-1".to_string())
    }

    async fn mount_discovery(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/.well-known/uma2-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": server.uri(),
                "authorization_endpoint": format!("{}/authorize", server.uri()),
                "token_endpoint": format!("{}/token", server.uri()),
                "jwks_uri": format!("{}/jwks", server.uri()),
                "permission_endpoint": format!("{}/perm", server.uri()),
                "introspection_endpoint": format!("{}/introspect", server.uri()),
            })))
            .mount(server)
            .await;
    }

    fn token_body(token: &str) -> serde_json::Value {
        json!({
            "access_token": token,
            "token_type": "Bearer",
            "expires_in": 300,
        })
    }

    #[tokio::test]
    async fn test_get_fetches_and_caches() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("scope=uma_protection"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("pat-1")))
            .expect(1)
            .mount(&server)
            .await;

        let (lifecycle, rp_id) = fixture(&server).await;
        let first = lifecycle.get(&rp_id).await.expect("get failed");
        assert_eq!(first.token, "pat-1");
        // second call is served from the cache, the mock allows one hit
        let second = lifecycle.get(&rp_id).await.expect("get failed");
        assert_eq!(second.token, "pat-1");
    }

    #[tokio::test]
    async fn test_force_refresh_replaces_cached_pat() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("pat-1")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("pat-2")))
            .mount(&server)
            .await;

        let (lifecycle, rp_id) = fixture(&server).await;
        let first = lifecycle.get(&rp_id).await.expect("get failed");
        assert_eq!(first.token, "pat-1");
        let refreshed = lifecycle
            .force_refresh(&rp_id, Some(&first.token))
            .await
            .expect("refresh failed");
        assert_eq!(refreshed.token, "pat-2");
        // the fresh token is now the cached one
        let cached = lifecycle.get(&rp_id).await.expect("get failed");
        assert_eq!(cached.token, "pat-2");
    }

    #[tokio::test]
    async fn test_force_refresh_coalesces_when_already_refreshed() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("pat-1")))
            .expect(1)
            .mount(&server)
            .await;

        let (lifecycle, rp_id) = fixture(&server).await;
        let current = lifecycle.get(&rp_id).await.expect("get failed");
        // the caller saw some older token rejected; the cache already moved on
        let refreshed = lifecycle
            .force_refresh(&rp_id, Some("pat-0"))
            .await
            .expect("refresh failed");
        assert_eq!(refreshed.token, current.token);
    }

    #[tokio::test]
    async fn test_with_pat_retry_refreshes_once_on_unauthorized() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("pat-1")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("pat-2")))
            .mount(&server)
            .await;
        // the protected call rejects the first PAT, then accepts the second
        Mock::given(method("POST"))
            .and(path("/perm"))
            .and(body_string_contains("pat-1"))
            .respond_with(ResponseTemplate::new(401).set_body_string("stale"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/perm"))
            .and(body_string_contains("pat-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ticket": "t-1"})))
            .expect(1)
            .mount(&server)
            .await;

        #[derive(Deserialize)]
        struct TicketResponse {
            ticket: String,
        }

        let (lifecycle, rp_id) = fixture(&server).await;
        let http = Client::new();
        let url = format!("{}/perm", server.uri());
        let response: TicketResponse = with_pat_retry(&lifecycle, &rp_id, |pat| {
            let http = http.clone();
            let url = url.clone();
            async move {
                call_as_json(
                    &http,
                    Method::POST,
                    &url,
                    AsAuth::Bearer(&pat.token),
                    Payload::Json(&json!({"token": pat.token})),
                )
                .await
            }
        })
        .await
        .expect("retry contract failed");
        assert_eq!(response.ticket, "t-1");
    }

    #[tokio::test]
    async fn test_with_pat_retry_gives_up_after_second_rejection() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("pat-1")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("pat-2")))
            .expect(1)
            .mount(&server)
            .await;
        // the AS rejects every PAT: one original call plus one retry, no third
        Mock::given(method("POST"))
            .and(path("/perm"))
            .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
            .expect(2)
            .mount(&server)
            .await;

        let (lifecycle, rp_id) = fixture(&server).await;
        let http = Client::new();
        let url = format!("{}/perm", server.uri());
        let result: Result<serde_json::Value, _> = with_pat_retry(&lifecycle, &rp_id, |pat| {
            let http = http.clone();
            let url = url.clone();
            async move {
                call_as_json(
                    &http,
                    Method::POST,
                    &url,
                    AsAuth::Bearer(&pat.token),
                    Payload::Empty,
                )
                .await
            }
        })
        .await;
        assert!(matches!(
            result,
            Err(UmaError::Upstream { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn test_with_pat_retry_does_not_retry_other_statuses() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("pat-1")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/perm"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let (lifecycle, rp_id) = fixture(&server).await;
        let http = Client::new();
        let url = format!("{}/perm", server.uri());
        let result: Result<serde_json::Value, _> = with_pat_retry(&lifecycle, &rp_id, |pat| {
            let http = http.clone();
            let url = url.clone();
            async move {
                call_as_json(
                    &http,
                    Method::POST,
                    &url,
                    AsAuth::Bearer(&pat.token),
                    Payload::Empty,
                )
                .await
            }
        })
        .await;
        assert!(matches!(
            result,
            Err(UmaError::Upstream { status: 500, .. })
        ));
    }
}
