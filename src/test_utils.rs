use crate::cache::memory::InMemoryCache;
use crate::cache::Cache;
use crate::config::RpConfig;
use crate::create_app;
use crate::state::AppState;
use axum::body::Body;
use axum::Router;
use http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test fixture wiring the full application router to a mock
/// authorization server.
///
/// Requests are dispatched with `tower::ServiceExt::oneshot`, so no port is
/// bound. `as_mock` plays the AS: mount discovery with
/// [`TestFixture::mount_discovery`] and add endpoint mocks per test.
pub struct TestFixture {
    /// The application router
    pub app: Router,
    /// Configuration the app was built with
    pub config: RpConfig,
    /// Mock authorization server
    pub as_mock: MockServer,
}

impl TestFixture {
    pub async fn new() -> Self {
        let _ = env_logger::builder()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();

        let as_mock = MockServer::start().await;
        let config = RpConfig::for_tests();
        let cache = Cache::InMemory(InMemoryCache::new(60, 16).expect("cache"));
        let state = AppState::with_existing_cache(&config, cache)
            .await
            .expect("Failed to build test state");
        let app = create_app(state).await;

        Self {
            app,
            config,
            as_mock,
        }
    }

    /// Mount the uma2-configuration discovery document on the mock AS
    pub async fn mount_discovery(&self) {
        let base = self.as_mock.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/uma2-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": base,
                "authorization_endpoint": format!("{base}/authorize"),
                "token_endpoint": format!("{base}/token"),
                "jwks_uri": format!("{base}/jwks"),
                "resource_registration_endpoint": format!("{base}/rreg"),
                "permission_endpoint": format!("{base}/perm"),
                "introspection_endpoint": format!("{base}/introspect"),
                "claims_interaction_endpoint": format!("{base}/claims-gathering"),
            })))
            .mount(&self.as_mock)
            .await;
    }

    /// Mount a PAT grant responder on the mock AS token endpoint. Matches
    /// only the client-credentials grant so RPT grant mocks can coexist.
    pub async fn mount_pat(&self, token: &str) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(wiremock::matchers::body_string_contains(
                "grant_type=client_credentials",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": token,
                "token_type": "Bearer",
                "expires_in": 300,
            })))
            .mount(&self.as_mock)
            .await;
    }

    /// Register an RP against the mock AS and return its rp_id
    pub async fn register_rp(&self) -> String {
        let response = self
            .post(
                "/register-site",
                &json!({
                    "op_host": self.as_mock.uri(),
                    "client_id": "client-1",
                    "client_secret": "secret-1",
                    "redirect_uris": ["https://rp.example.com/cb"],
                }),
            )
            .await;
        response.assert_ok();
        response.json["rp_id"]
            .as_str()
            .expect("missing rp_id")
            .to_string()
    }

    /// Creates a request builder with the test API key pre-set
    pub fn request_builder(&self, method: Method, uri: impl AsRef<str>) -> http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri.as_ref())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
    }

    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        let request = self
            .request_builder(Method::GET, uri)
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    pub async fn post<T: Serialize>(&self, uri: impl AsRef<str>, body: &T) -> TestResponse {
        let json_body = serde_json::to_vec(body).expect("Failed to serialize body to JSON");
        let request = self
            .request_builder(Method::POST, uri)
            .body(Body::from(json_body))
            .expect("Failed to build request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        let json = if !body.is_empty() {
            serde_json::from_slice(&body).unwrap_or_else(|_| json!({}))
        } else {
            json!({})
        };
        let text = String::from_utf8_lossy(&body).into_owned();

        TestResponse {
            status,
            headers,
            json,
            text,
        }
    }
}

/// Captured response from the test app
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: http::HeaderMap,
    pub json: Value,
    pub text: String,
}

impl TestResponse {
    pub fn assert_ok(&self) {
        assert!(
            self.status.is_success(),
            "expected success, got {}: {}",
            self.status,
            self.text
        );
    }

    pub fn assert_status(&self, expected: StatusCode) {
        assert_eq!(
            self.status, expected,
            "unexpected status, body: {}",
            self.text
        );
    }

    pub fn json_as<T: DeserializeOwned>(&self) -> T {
        serde_json::from_value(self.json.clone()).expect("Failed to deserialize response")
    }
}
