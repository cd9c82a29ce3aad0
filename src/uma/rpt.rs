use crate::discovery::DiscoveryService;
use crate::models::TokenResponse;
use crate::persistence::RpStore;
use crate::uma::{call_as, AsAuth, NeedInfo, Payload, UmaError};
use log::{debug, info};
use reqwest::{Client, Method};
use std::sync::Arc;

const UMA_TICKET_GRANT: &str = "urn:ietf:params:oauth:grant-type:uma-ticket";

/// Exchanges permission tickets for requesting-party tokens at the AS
/// token endpoint, reshaping claims-gathering denials into structured
/// errors
pub struct RptService {
    http: Client,
    discovery: Arc<DiscoveryService>,
    rps: Arc<dyn RpStore>,
}

impl RptService {
    pub fn new(http: Client, discovery: Arc<DiscoveryService>, rps: Arc<dyn RpStore>) -> Self {
        Self {
            http,
            discovery,
            rps,
        }
    }

    /// Exchange a permission ticket for an RPT.
    ///
    /// `claim_token` and `claim_token_format` must be supplied together or
    /// not at all. On a client-error response whose body parses as a
    /// "needs more claims" payload, the error is reshaped into
    /// [`UmaError::NeedInfo`]: `invalid_claim_token_format` and
    /// `invalid_ticket` keep status 400, any other claims error maps to
    /// 403. Bodies that do not parse as that shape propagate unchanged.
    pub async fn exchange_ticket(
        &self,
        rp_id: &str,
        ticket: &str,
        claim_token: Option<&str>,
        claim_token_format: Option<&str>,
    ) -> Result<TokenResponse, UmaError> {
        if claim_token.is_some() != claim_token_format.is_some() {
            return Err(UmaError::ClaimTokenPair);
        }

        let rp = self.rps.load(rp_id).await?;
        let metadata = self.discovery.metadata(&rp.op_host).await?;

        let mut form = vec![
            ("grant_type", UMA_TICKET_GRANT.to_string()),
            ("ticket", ticket.to_string()),
        ];
        if let (Some(token), Some(format)) = (claim_token, claim_token_format) {
            form.push(("claim_token", token.to_string()));
            form.push(("claim_token_format", format.to_string()));
        }

        let result = call_as(
            &self.http,
            Method::POST,
            &metadata.token_endpoint,
            AsAuth::Basic {
                id: &rp.client_id,
                secret: &rp.client_secret,
            },
            Payload::Form(&form),
        )
        .await;

        match result {
            Ok(body) => {
                let response: TokenResponse = serde_json::from_slice(&body)?;
                info!("Obtained RPT for {}", rp_id);
                Ok(response)
            }
            Err(UmaError::Upstream { status, body }) if (400..500).contains(&status) => {
                match serde_json::from_str::<NeedInfo>(&body) {
                    Ok(need_info) if !need_info.error.is_empty() => {
                        let status = match need_info.error.as_str() {
                            "invalid_claim_token_format" | "invalid_ticket" => 400,
                            _ => 403,
                        };
                        debug!(
                            "AS requires more claims for {}: {} ({} claims listed)",
                            rp_id,
                            need_info.error,
                            need_info.required_claims.len()
                        );
                        Err(UmaError::NeedInfo { status, need_info })
                    }
                    _ => Err(UmaError::Upstream { status, body }),
                }
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rp;
    use crate::persistence::InMemoryRpStore;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn service(server: &MockServer) -> RptService {
        let rps = Arc::new(InMemoryRpStore::new());
        rps.save(Rp {
            rp_id: "rp-1".to_string(),
            op_host: server.uri(),
            client_id: "client-1".to_string(),
            client_secret: "secret-1".to_string(),
            scope: vec!["openid".to_string()],
            response_types: vec!["code".to_string()],
            redirect_uris: vec!["https://rp.example.com/cb".to_string()],
            uma_resources: vec![],
        })
        .await
        .expect("save failed");
        RptService::new(
            Client::new(),
            Arc::new(DiscoveryService::new(Client::new(), 3600)),
            rps,
        )
    }

    async fn mount_discovery(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/.well-known/uma2-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": server.uri(),
                "authorization_endpoint": format!("{}/authorize", server.uri()),
                "token_endpoint": format!("{}/token", server.uri()),
                "jwks_uri": format!("{}/jwks", server.uri()),
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_successful_exchange() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=urn"))
            .and(body_string_contains("ticket=t-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "rpt-1",
                "token_type": "Bearer",
                "pct": "pct-1",
                "upgraded": false,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(&server).await;
        let response = service
            .exchange_ticket("rp-1", "t-1", None, None)
            .await
            .expect("exchange failed");
        assert_eq!(response.access_token, "rpt-1");
        assert_eq!(response.pct.as_deref(), Some("pct-1"));
    }

    #[tokio::test]
    async fn test_claim_token_without_format_rejected_before_network() {
        let server = MockServer::start().await;
        // no mocks mounted: the pair check fires first

        let service = service(&server).await;
        let result = service
            .exchange_ticket("rp-1", "t-1", Some("claims-jwt"), None)
            .await;
        assert!(matches!(result, Err(UmaError::ClaimTokenPair)));
    }

    #[tokio::test]
    async fn test_need_info_is_reshaped() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": "need_info",
                "ticket": "t-2",
                "required_claims": [
                    {"claim_type": "string", "name": "email", "friendly_name": "email"},
                ],
            })))
            .mount(&server)
            .await;

        let service = service(&server).await;
        let result = service.exchange_ticket("rp-1", "t-1", None, None).await;
        match result {
            Err(UmaError::NeedInfo { status, need_info }) => {
                assert_eq!(status, 403);
                assert_eq!(need_info.error, "need_info");
                assert_eq!(need_info.ticket.as_deref(), Some("t-2"));
                assert_eq!(need_info.required_claims.len(), 1);
                assert_eq!(need_info.required_claims[0].name.as_deref(), Some("email"));
            }
            other => panic!("expected need-info, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_invalid_ticket_keeps_bad_request_status() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({"error": "invalid_ticket"})),
            )
            .mount(&server)
            .await;

        let service = service(&server).await;
        let result = service.exchange_ticket("rp-1", "t-stale", None, None).await;
        assert!(matches!(
            result,
            Err(UmaError::NeedInfo { status: 400, need_info }) if need_info.error == "invalid_ticket"
        ));
    }

    #[tokio::test]
    async fn test_unparsable_denial_propagates_unchanged() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("not json"))
            .mount(&server)
            .await;

        let service = service(&server).await;
        let result = service.exchange_ticket("rp-1", "t-1", None, None).await;
        match result {
            Err(UmaError::Upstream { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "not json");
            }
            other => panic!("expected upstream error, got {:?}", other.map(|_| ())),
        }
    }
}
