use crate::errors::ApiError;
use crate::models::Rp;
use crate::openapi::SITE_TAG;
use crate::state::AppState;
use crate::store::ObjectType;
use crate::validator::TokenValidator;
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use http::{header::CONTENT_TYPE, StatusCode};
use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterSiteRequest {
    /// Issuer URL of the authorization server
    pub op_host: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_scope")]
    pub scope: Vec<String>,
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,
    pub redirect_uris: Vec<String>,
}

fn default_scope() -> Vec<String> {
    vec!["openid".to_string()]
}

fn default_response_types() -> Vec<String> {
    vec!["code".to_string()]
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterSiteResponse {
    pub rp_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizationUrlRequest {
    pub rp_id: String,
    /// Overrides the scopes registered for the RP
    #[serde(default)]
    pub scope: Option<Vec<String>>,
    /// Overrides the first registered redirect URI
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Signed request object to stage for retrieval by the AS
    #[serde(default)]
    pub request_object: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizationUrlResponse {
    pub authorization_url: String,
    pub state: String,
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_uri: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizationResultRequest {
    pub rp_id: String,
    pub id_token: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizationResultResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

/// Random 256-bit URL-safe token, used for rp_ids, states and nonces
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Register a relying party
#[utoipa::path(
    post,
    path = "/register-site",
    tag = SITE_TAG,
    request_body = RegisterSiteRequest,
    responses(
        (status = 200, description = "RP registered", body = RegisterSiteResponse),
        (status = 400, description = "Invalid registration"),
    )
)]
async fn register_site(
    State(state): State<AppState>,
    Json(request): Json<RegisterSiteRequest>,
) -> Result<Json<RegisterSiteResponse>, ApiError> {
    let op_host = Url::parse(&request.op_host)
        .map_err(|e| ApiError::bad_request(format!("Invalid op_host: {}", e)))?;
    if request.redirect_uris.is_empty() {
        return Err(ApiError::bad_request("At least one redirect_uri is required"));
    }
    for uri in &request.redirect_uris {
        Url::parse(uri)
            .map_err(|e| ApiError::bad_request(format!("Invalid redirect_uri {}: {}", uri, e)))?;
    }

    let rp_id = generate_token();
    let rp = Rp {
        rp_id: rp_id.clone(),
        op_host: op_host.to_string().trim_end_matches('/').to_string(),
        client_id: request.client_id,
        client_secret: request.client_secret,
        scope: request.scope,
        response_types: request.response_types,
        redirect_uris: request.redirect_uris,
        uma_resources: vec![],
    };
    state.rps.save(rp).await?;
    info!("Registered RP {}", rp_id);
    Ok(Json(RegisterSiteResponse { rp_id }))
}

/// Build an authorization URL with fresh single-use state and nonce
#[utoipa::path(
    post,
    path = "/get-authorization-url",
    tag = SITE_TAG,
    request_body = AuthorizationUrlRequest,
    responses(
        (status = 200, description = "Authorization URL built", body = AuthorizationUrlResponse),
        (status = 404, description = "Unknown rp_id"),
    )
)]
async fn get_authorization_url(
    State(state): State<AppState>,
    Json(request): Json<AuthorizationUrlRequest>,
) -> Result<Json<AuthorizationUrlResponse>, ApiError> {
    let rp = state.rps.load(&request.rp_id).await?;
    let metadata = state.discovery.metadata(&rp.op_host).await?;

    let redirect_uri = request
        .redirect_uri
        .or_else(|| rp.redirect_uris.first().cloned())
        .ok_or_else(|| ApiError::bad_request("RP has no redirect_uri registered"))?;
    let scope = request.scope.unwrap_or_else(|| rp.scope.clone());

    let oauth_state = generate_token();
    let nonce = generate_token();
    state
        .store
        .put(
            ObjectType::State,
            &oauth_state,
            state.store.default_ttl(ObjectType::State),
        )
        .await?;
    state
        .store
        .put(
            ObjectType::Nonce,
            &nonce,
            state.store.default_ttl(ObjectType::Nonce),
        )
        .await?;

    let mut request_uri = None;
    if let Some(request_object) = request.request_object {
        let key = generate_token();
        state
            .store
            .put_keyed(
                ObjectType::RequestObject,
                &key,
                request_object,
                state.store.default_ttl(ObjectType::RequestObject),
            )
            .await?;
        request_uri = Some(format!(
            "{}/request-object/{}",
            state.config.base_url.trim_end_matches('/'),
            key
        ));
    }

    let mut url = Url::parse(&metadata.authorization_endpoint)
        .map_err(|e| ApiError::bad_gateway(format!("Invalid authorization_endpoint: {}", e)))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs
            .append_pair("response_type", &rp.response_types.join(" "))
            .append_pair("client_id", &rp.client_id)
            .append_pair("redirect_uri", &redirect_uri)
            .append_pair("scope", &scope.join(" "))
            .append_pair("state", &oauth_state)
            .append_pair("nonce", &nonce);
        if let Some(request_uri) = &request_uri {
            pairs.append_pair("request_uri", request_uri);
        }
    }

    Ok(Json(AuthorizationUrlResponse {
        authorization_url: url.to_string(),
        state: oauth_state,
        nonce,
        request_uri,
    }))
}

/// Validate the tokens returned from an authorization round trip.
///
/// The checks are layered: signature and standard claims always, nonce
/// always (single use), state when supplied (single use), at_hash when an
/// access token is supplied, c_hash when a code is supplied.
#[utoipa::path(
    post,
    path = "/authorization-result",
    tag = SITE_TAG,
    request_body = AuthorizationResultRequest,
    responses(
        (status = 200, description = "Tokens are valid", body = AuthorizationResultResponse),
        (status = 400, description = "A validation check failed"),
        (status = 404, description = "Unknown rp_id"),
    )
)]
async fn authorization_result(
    State(state): State<AppState>,
    Json(request): Json<AuthorizationResultRequest>,
) -> Result<Json<AuthorizationResultResponse>, ApiError> {
    let rp = state.rps.load(&request.rp_id).await?;
    let metadata = state.discovery.metadata(&rp.op_host).await?;

    let validator = TokenValidator::new(
        &request.id_token,
        metadata,
        &rp,
        &state.keys,
        &state.store,
    )?;
    validator.validate_id_token(None).await?;
    validator.validate_nonce().await?;
    if let Some(oauth_state) = &request.state {
        validator.validate_state(oauth_state).await?;
    }
    if let Some(access_token) = &request.access_token {
        validator.validate_access_token(access_token, rp.requires_at_hash())?;
    }
    if let Some(code) = &request.code {
        validator.validate_authorization_code(code)?;
    }

    info!("Validated authorization result for {}", request.rp_id);
    Ok(Json(AuthorizationResultResponse {
        valid: true,
        sub: validator.claims().sub.clone(),
    }))
}

/// One-shot retrieval of a staged request object. The AS fetches this URL
/// without credentials; the object is deleted on first read.
#[utoipa::path(
    get,
    path = "/request-object/{key}",
    tag = SITE_TAG,
    params(("key" = String, Path, description = "Key issued at staging time")),
    responses(
        (status = 200, description = "The staged request object JWT"),
        (status = 404, description = "Unknown, expired or already-consumed key"),
    )
)]
pub(crate) async fn get_request_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    match state
        .store
        .consume(ObjectType::RequestObject, &key)
        .await?
    {
        Some(object) => Ok((
            StatusCode::OK,
            [(CONTENT_TYPE, "application/jwt")],
            object.value,
        )
            .into_response()),
        None => Err(ApiError::not_found("Unknown request object key")),
    }
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/register-site", post(register_site))
        .route("/get-authorization-url", post(get_authorization_url))
        .route("/authorization-result", post(authorization_result))
}
