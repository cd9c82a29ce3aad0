use crate::discovery::DiscoveryError;
use crate::persistence::RpStoreError;
use crate::store::StoreError;
use log::debug;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use utoipa::ToSchema;

pub mod decision;
pub mod pat;
pub mod registry;
pub mod rpt;
pub mod scope_expression;

use pat::PatLifecycle;
use scope_expression::ScopeExpressionError;

/// Errors raised by the UMA state machine and its calls to the
/// authorization server. The variants follow the taxonomy: validation and
/// conflict failures are fatal and never retried; upstream failures keep
/// the AS status and body; need-info is a reshaped upstream response.
#[derive(Debug, Error)]
pub enum UmaError {
    #[error("Failed to send request to authorization server: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Authorization server returned status {status}")]
    Upstream { status: u16, body: String },
    #[error("Claims gathering required: {}", need_info.error)]
    NeedInfo { status: u16, need_info: NeedInfo },
    #[error("Failed to parse authorization server response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Persistence(#[from] RpStoreError),
    #[error("No resource protects {http_method} {path}")]
    ResourceNotProtected { path: String, http_method: String },
    #[error("RP already has protected resources; pass overwrite to replace them")]
    AlreadyProtected,
    #[error("Duplicate http method {http_method} for path {path} in resource batch")]
    DuplicateMethod { path: String, http_method: String },
    #[error(transparent)]
    ScopeExpression(#[from] ScopeExpressionError),
    #[error("claim_token and claim_token_format must be supplied together")]
    ClaimTokenPair,
    #[error("The authorization server does not advertise a {0} endpoint")]
    MissingEndpoint(&'static str),
}

/// Structured "needs more claims" payload returned by the AS on a denied
/// ticket grant
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct NeedInfo {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_claims: Vec<RequiredClaim>,
}

/// One claim the AS requires before it will grant the ticket
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct RequiredClaim {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_token_format: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Credentials attached to a call to the authorization server
pub(crate) enum AsAuth<'a> {
    Basic { id: &'a str, secret: &'a str },
    Bearer(&'a str),
}

/// Body attached to a call to the authorization server
pub(crate) enum Payload<'a> {
    Empty,
    Json(&'a serde_json::Value),
    Form(&'a [(&'a str, String)]),
}

/// Send a request to the authorization server and return the successful
/// body. Any non-success status becomes [`UmaError::Upstream`] with the
/// status and body preserved.
pub(crate) async fn call_as(
    client: &Client,
    method: Method,
    url: &str,
    auth: AsAuth<'_>,
    payload: Payload<'_>,
) -> Result<Vec<u8>, UmaError> {
    debug!("Calling authorization server: {} {}", method, url);
    let mut request = client.request(method, url);
    request = match auth {
        AsAuth::Basic { id, secret } => request.basic_auth(id, Some(secret)),
        AsAuth::Bearer(token) => request.bearer_auth(token),
    };
    request = match payload {
        Payload::Empty => request,
        Payload::Json(body) => request.json(body),
        Payload::Form(fields) => request.form(fields),
    };

    let response = request.send().await?;
    let status = response.status();
    let body = response.bytes().await?.to_vec();
    if !status.is_success() {
        return Err(UmaError::Upstream {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }
    Ok(body)
}

/// [`call_as`] with a JSON-decoded response
pub(crate) async fn call_as_json<R: DeserializeOwned>(
    client: &Client,
    method: Method,
    url: &str,
    auth: AsAuth<'_>,
    payload: Payload<'_>,
) -> Result<R, UmaError> {
    let body = call_as(client, method, url, auth, payload).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// The uniform PAT retry contract.
///
/// Runs `call` with the cached (or freshly obtained) PAT. If the AS rejects
/// it with 400 or 401 the PAT is assumed stale: it is force-refreshed once
/// and the call retried exactly once. Any other status, or a second
/// failure, propagates to the caller unchanged.
pub(crate) async fn with_pat_retry<T, F, Fut>(
    pats: &PatLifecycle,
    rp_id: &str,
    call: F,
) -> Result<T, UmaError>
where
    F: Fn(pat::Pat) -> Fut,
    Fut: Future<Output = Result<T, UmaError>>,
{
    let pat = pats.get(rp_id).await?;
    let used_token = pat.token.clone();
    match call(pat).await {
        Err(UmaError::Upstream { status, .. }) if status == 400 || status == 401 => {
            debug!(
                "AS rejected PAT for {} with {}, refreshing and retrying once",
                rp_id, status
            );
            let fresh = pats.force_refresh(rp_id, Some(&used_token)).await?;
            call(fresh).await
        }
        other => other,
    }
}
