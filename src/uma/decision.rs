use crate::discovery::DiscoveryService;
use crate::models::{Rp, RptIntrospection, UmaResource};
use crate::persistence::RpStore;
use crate::uma::pat::PatLifecycle;
use crate::uma::registry;
use crate::uma::{call_as_json, with_pat_retry, AsAuth, Payload, UmaError};
use log::{debug, info};
use reqwest::{Client, Method};
use serde::Deserialize;
use std::sync::Arc;

/// Outcome of an access check
#[derive(Debug, Clone, PartialEq)]
pub enum AccessDecision {
    Granted {
        resource_id: String,
        scopes: Vec<String>,
    },
    /// Denied with a permission ticket and a ready-made WWW-Authenticate
    /// value the caller can forward to the requesting party
    Denied {
        ticket: String,
        www_authenticate: String,
    },
}

#[derive(Debug, Deserialize)]
struct TicketResponse {
    ticket: String,
}

/// Decides whether an RPT grants access to a protected resource, and
/// issues permission tickets when it does not
pub struct DecisionEngine {
    http: Client,
    discovery: Arc<DiscoveryService>,
    rps: Arc<dyn RpStore>,
    pats: Arc<PatLifecycle>,
    realm: String,
}

impl DecisionEngine {
    pub fn new(
        http: Client,
        discovery: Arc<DiscoveryService>,
        rps: Arc<dyn RpStore>,
        pats: Arc<PatLifecycle>,
        realm: String,
    ) -> Self {
        Self {
            http,
            discovery,
            rps,
            pats,
            realm,
        }
    }

    /// Check whether `rpt` grants `http_method` on `path`.
    ///
    /// The scopes to require are picked in precedence order: an explicit
    /// `scopes` argument wins, then the resource's static scope list, then
    /// the vocabulary of its scope expression. A missing, empty or
    /// inactive RPT, or one missing a required scope, yields a ticket
    /// covering the resource's ticket scopes.
    pub async fn check_access(
        &self,
        rp_id: &str,
        path: &str,
        http_method: &str,
        rpt: Option<&str>,
        scopes: &[String],
    ) -> Result<AccessDecision, UmaError> {
        let rp = self.rps.load(rp_id).await?;
        let resource = registry::lookup(&rp, path, http_method)
            .ok_or_else(|| UmaError::ResourceNotProtected {
                path: path.to_string(),
                http_method: http_method.to_string(),
            })?
            .clone();
        let required = required_scopes(&resource, scopes);

        if let Some(rpt) = rpt.filter(|token| !token.is_empty()) {
            let introspection = self.introspect(&rp, rpt).await?;
            if let Some(expression) = &resource.scope_expression {
                // expression-governed resources evaluate the rule over
                // whatever scopes the RPT actually carries
                if scopes.is_empty() && self.satisfies_expression(&introspection, &resource) {
                    debug!("RPT satisfies scope expression for {} {}", http_method, path);
                    return Ok(AccessDecision::Granted {
                        resource_id: resource.id,
                        scopes: expression.ticket_scopes(),
                    });
                }
            }
            if introspection.grants(&resource.id, &required) {
                debug!("RPT grants {} {} for {}", http_method, path, rp_id);
                return Ok(AccessDecision::Granted {
                    resource_id: resource.id,
                    scopes: required,
                });
            }
        }

        let ticket_scopes = if required.is_empty() {
            &resource.ticket_scopes
        } else {
            &required
        };
        let ticket = self.request_ticket(&rp, &resource.id, ticket_scopes).await?;
        let www_authenticate = format!(
            "UMA realm=\"{}\", as_uri=\"{}\", ticket=\"{}\"",
            self.realm, rp.op_host, ticket
        );
        info!("Denied {} {} for {}, ticket issued", http_method, path, rp_id);
        Ok(AccessDecision::Denied {
            ticket,
            www_authenticate,
        })
    }

    fn satisfies_expression(&self, introspection: &RptIntrospection, resource: &UmaResource) -> bool {
        let Some(expression) = &resource.scope_expression else {
            return false;
        };
        if !introspection.active {
            return false;
        }
        let granted: Vec<String> = introspection
            .permissions
            .iter()
            .filter(|permission| permission.resource_id == resource.id)
            .flat_map(|permission| permission.resource_scopes.iter().cloned())
            .collect();
        expression.evaluate(&granted).unwrap_or(false)
    }

    async fn introspect(&self, rp: &Rp, rpt: &str) -> Result<RptIntrospection, UmaError> {
        let metadata = self.discovery.metadata(&rp.op_host).await?;
        let endpoint = metadata
            .introspection_endpoint
            .as_deref()
            .ok_or(UmaError::MissingEndpoint("introspection"))?
            .to_string();
        let form = [("token", rpt.to_string())];
        with_pat_retry(&self.pats, &rp.rp_id, |pat| {
            let endpoint = endpoint.clone();
            let form = form.clone();
            async move {
                call_as_json(
                    &self.http,
                    Method::POST,
                    &endpoint,
                    AsAuth::Bearer(&pat.token),
                    Payload::Form(&form),
                )
                .await
            }
        })
        .await
    }

    async fn request_ticket(
        &self,
        rp: &Rp,
        resource_id: &str,
        scopes: &[String],
    ) -> Result<String, UmaError> {
        let metadata = self.discovery.metadata(&rp.op_host).await?;
        let endpoint = metadata
            .permission_endpoint
            .as_deref()
            .ok_or(UmaError::MissingEndpoint("permission"))?
            .to_string();
        let body = serde_json::json!({
            "resource_id": resource_id,
            "resource_scopes": scopes,
        });
        let response: TicketResponse = with_pat_retry(&self.pats, &rp.rp_id, |pat| {
            let endpoint = endpoint.clone();
            let body = body.clone();
            async move {
                call_as_json(
                    &self.http,
                    Method::POST,
                    &endpoint,
                    AsAuth::Bearer(&pat.token),
                    Payload::Json(&body),
                )
                .await
            }
        })
        .await?;
        Ok(response.ticket)
    }
}

/// Scope precedence: explicit request scopes, then the static list, then
/// the expression vocabulary
fn required_scopes(resource: &UmaResource, explicit: &[String]) -> Vec<String> {
    if !explicit.is_empty() {
        return explicit.to_vec();
    }
    if !resource.scopes.is_empty() {
        return resource.scopes.clone();
    }
    if let Some(expression) = &resource.scope_expression {
        return expression.ticket_scopes();
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCache;
    use crate::cache::Cache;
    use crate::config::RpConfig;
    use crate::persistence::{InMemoryRpStore, KeyedLocks};
    use crate::store::ExpiredObjectStore;
    use crate::uma::scope_expression::ScopeExpression;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resource(scopes: &[&str]) -> UmaResource {
        UmaResource {
            id: "res-1".to_string(),
            path: "/photos".to_string(),
            http_methods: vec!["GET".to_string()],
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            scope_expression: None,
            ticket_scopes: scopes.iter().map(|s| s.to_string()).collect(),
            iat: Some(1_700_000_000),
            exp: None,
        }
    }

    async fn engine_with(server: &MockServer, resources: Vec<UmaResource>) -> DecisionEngine {
        let config = RpConfig::for_tests();
        let cache = Cache::InMemory(InMemoryCache::new(3600, 16).expect("cache"));
        let store = Arc::new(ExpiredObjectStore::new(cache, &config.uma));
        let rps = Arc::new(InMemoryRpStore::new());
        rps.save(Rp {
            rp_id: "rp-1".to_string(),
            op_host: server.uri(),
            client_id: "client-1".to_string(),
            client_secret: "secret-1".to_string(),
            scope: vec!["openid".to_string()],
            response_types: vec!["code".to_string()],
            redirect_uris: vec!["https://rp.example.com/cb".to_string()],
            uma_resources: resources,
        })
        .await
        .expect("save failed");

        let discovery = Arc::new(DiscoveryService::new(Client::new(), 3600));
        let pats = Arc::new(PatLifecycle::new(
            Client::new(),
            store,
            discovery.clone(),
            rps.clone(),
            Arc::new(KeyedLocks::new()),
            3600,
        ));
        DecisionEngine::new(Client::new(), discovery, rps, pats, "rp".to_string())
    }

    async fn mount_as(server: &MockServer) {
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
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "pat-1",
                "token_type": "Bearer",
                "expires_in": 300,
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_active_rpt_with_required_scopes_is_granted() {
        let server = MockServer::start().await;
        mount_as(&server).await;
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .and(body_string_contains("token=rpt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "active": true,
                "permissions": [
                    {"resource_id": "res-1", "resource_scopes": ["read", "write"]},
                ],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine_with(&server, vec![resource(&["read"])]).await;
        let decision = engine
            .check_access("rp-1", "/photos", "GET", Some("rpt-1"), &[])
            .await
            .expect("check failed");
        assert_eq!(
            decision,
            AccessDecision::Granted {
                resource_id: "res-1".to_string(),
                scopes: vec!["read".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn test_inactive_rpt_yields_ticket_and_hint() {
        let server = MockServer::start().await;
        mount_as(&server).await;
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active": false})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/perm"))
            .and(body_partial_json(json!({
                "resource_id": "res-1",
                "resource_scopes": ["read"],
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ticket": "t-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine_with(&server, vec![resource(&["read"])]).await;
        let decision = engine
            .check_access("rp-1", "/photos", "GET", Some("rpt-1"), &[])
            .await
            .expect("check failed");
        match decision {
            AccessDecision::Denied {
                ticket,
                www_authenticate,
            } => {
                assert_eq!(ticket, "t-1");
                assert_eq!(
                    www_authenticate,
                    format!(
                        "UMA realm=\"rp\", as_uri=\"{}\", ticket=\"t-1\"",
                        server.uri()
                    )
                );
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_rpt_skips_introspection() {
        let server = MockServer::start().await;
        mount_as(&server).await;
        // no introspection mock mounted: reaching it would fail the test
        Mock::given(method("POST"))
            .and(path("/perm"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ticket": "t-2"})))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine_with(&server, vec![resource(&["read"])]).await;
        let decision = engine
            .check_access("rp-1", "/photos", "GET", None, &[])
            .await
            .expect("check failed");
        assert!(matches!(decision, AccessDecision::Denied { ticket, .. } if ticket == "t-2"));
    }

    #[tokio::test]
    async fn test_explicit_scopes_take_precedence() {
        let server = MockServer::start().await;
        mount_as(&server).await;
        // the RPT carries read only, but the caller demands write
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "active": true,
                "permissions": [
                    {"resource_id": "res-1", "resource_scopes": ["read"]},
                ],
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/perm"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ticket": "t-3"})))
            .mount(&server)
            .await;

        let engine = engine_with(&server, vec![resource(&["read"])]).await;
        let decision = engine
            .check_access(
                "rp-1",
                "/photos",
                "GET",
                Some("rpt-1"),
                &["write".to_string()],
            )
            .await
            .expect("check failed");
        assert!(matches!(decision, AccessDecision::Denied { .. }));
    }

    #[tokio::test]
    async fn test_scope_less_resource_grants_on_any_permission() {
        let server = MockServer::start().await;
        mount_as(&server).await;
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "active": true,
                "permissions": [
                    {"resource_id": "res-1", "resource_scopes": ["read"]},
                ],
            })))
            .mount(&server)
            .await;
        // without an RPT the ticket covers the resource's ticket scopes,
        // empty for a scope-less registration
        Mock::given(method("POST"))
            .and(path("/perm"))
            .and(body_partial_json(json!({
                "resource_id": "res-1",
                "resource_scopes": [],
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ticket": "t-4"})))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine_with(&server, vec![resource(&[])]).await;
        // any active permission on the resource suffices when it requires
        // no particular scope
        let decision = engine
            .check_access("rp-1", "/photos", "GET", Some("rpt-1"), &[])
            .await
            .expect("check failed");
        assert_eq!(
            decision,
            AccessDecision::Granted {
                resource_id: "res-1".to_string(),
                scopes: vec![],
            }
        );

        let denied = engine
            .check_access("rp-1", "/photos", "GET", None, &[])
            .await
            .expect("check failed");
        assert!(matches!(denied, AccessDecision::Denied { ticket, .. } if ticket == "t-4"));
    }

    #[tokio::test]
    async fn test_expression_resource_evaluates_rule() {
        let server = MockServer::start().await;
        mount_as(&server).await;
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "active": true,
                "permissions": [
                    {"resource_id": "res-1", "resource_scopes": ["view"]},
                ],
            })))
            .mount(&server)
            .await;

        let mut governed = resource(&[]);
        governed.scope_expression = Some(ScopeExpression {
            rule: json!({"or": [{"var": 0}, {"var": 1}]}),
            data: vec!["view".to_string(), "all".to_string()],
        });
        governed.ticket_scopes = vec!["view".to_string(), "all".to_string()];

        let engine = engine_with(&server, vec![governed]).await;
        let decision = engine
            .check_access("rp-1", "/photos", "GET", Some("rpt-1"), &[])
            .await
            .expect("check failed");
        assert!(matches!(decision, AccessDecision::Granted { .. }));
    }

    #[tokio::test]
    async fn test_unprotected_path_is_an_error() {
        let server = MockServer::start().await;
        mount_as(&server).await;

        let engine = engine_with(&server, vec![resource(&["read"])]).await;
        let result = engine
            .check_access("rp-1", "/videos", "GET", None, &[])
            .await;
        assert!(matches!(
            result,
            Err(UmaError::ResourceNotProtected { .. })
        ));
    }
}
