use crate::errors::ApiError;
use crate::models::{TokenResponse, UmaResource};
use crate::openapi::UMA_TAG;
use crate::state::AppState;
use crate::uma::decision::AccessDecision;
use crate::uma::registry::{ResourceDescriptor, ScopeChange};
use crate::uma::scope_expression::ScopeExpression;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use http::{header::WWW_AUTHENTICATE, StatusCode};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProtectRequest {
    pub rp_id: String,
    pub resources: Vec<ResourceDescriptor>,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProtectResponse {
    pub resources: Vec<UmaResource>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ModifyRequest {
    pub rp_id: String,
    pub path: String,
    pub http_method: String,
    /// New static scope list; mutually exclusive with scope_expression
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    /// New scope expression; mutually exclusive with scopes
    #[serde(default)]
    pub scope_expression: Option<ScopeExpression>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckAccessRequest {
    pub rp_id: String,
    pub path: String,
    pub http_method: String,
    #[serde(default)]
    pub rpt: Option<String>,
    /// Explicit scopes to require, overriding the resource's own
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckAccessResponse {
    pub access: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RptRequest {
    pub rp_id: String,
    pub ticket: String,
    #[serde(default)]
    pub claim_token: Option<String>,
    #[serde(default)]
    pub claim_token_format: Option<String>,
}

/// Register a batch of protected resources for an RP
#[utoipa::path(
    post,
    path = "/uma/protect",
    tag = UMA_TAG,
    request_body = ProtectRequest,
    responses(
        (status = 200, description = "Resources registered", body = ProtectResponse),
        (status = 404, description = "Unknown rp_id"),
        (status = 409, description = "Already protected, or duplicate method in batch"),
    )
)]
async fn protect(
    State(state): State<AppState>,
    Json(request): Json<ProtectRequest>,
) -> Result<Json<ProtectResponse>, ApiError> {
    let resources = state
        .registry
        .protect(&request.rp_id, request.resources, request.overwrite)
        .await?;
    Ok(Json(ProtectResponse { resources }))
}

/// Replace the scopes of one protected resource
#[utoipa::path(
    post,
    path = "/uma/modify",
    tag = UMA_TAG,
    request_body = ModifyRequest,
    responses(
        (status = 200, description = "Resource updated", body = UmaResource),
        (status = 400, description = "Invalid scope change"),
        (status = 404, description = "Unknown rp_id or unprotected path"),
    )
)]
async fn modify(
    State(state): State<AppState>,
    Json(request): Json<ModifyRequest>,
) -> Result<Json<UmaResource>, ApiError> {
    let change = match (request.scopes, request.scope_expression) {
        (Some(scopes), None) => ScopeChange::Scopes(scopes),
        (None, Some(expression)) => ScopeChange::Expression(expression),
        _ => {
            return Err(ApiError::bad_request(
                "Exactly one of scopes or scope_expression must be supplied",
            ))
        }
    };
    let resource = state
        .registry
        .modify(&request.rp_id, &request.path, &request.http_method, change)
        .await?;
    Ok(Json(resource))
}

/// Decide whether an RPT grants access to a protected resource. Denials
/// carry a permission ticket and a WWW-Authenticate header the caller can
/// forward verbatim.
#[utoipa::path(
    post,
    path = "/uma/check-access",
    tag = UMA_TAG,
    request_body = CheckAccessRequest,
    responses(
        (status = 200, description = "Access granted", body = CheckAccessResponse),
        (status = 403, description = "Access denied, ticket issued", body = CheckAccessResponse),
        (status = 404, description = "Unknown rp_id or unprotected path"),
    )
)]
async fn check_access(
    State(state): State<AppState>,
    Json(request): Json<CheckAccessRequest>,
) -> Result<Response, ApiError> {
    let decision = state
        .decisions
        .check_access(
            &request.rp_id,
            &request.path,
            &request.http_method,
            request.rpt.as_deref(),
            &request.scopes,
        )
        .await?;
    match decision {
        AccessDecision::Granted { .. } => Ok(Json(CheckAccessResponse {
            access: "granted".to_string(),
            ticket: None,
        })
        .into_response()),
        AccessDecision::Denied {
            ticket,
            www_authenticate,
        } => {
            let header = www_authenticate
                .parse()
                .map_err(|_| ApiError::internal("Unrepresentable WWW-Authenticate value"))?;
            let mut response = (
                StatusCode::FORBIDDEN,
                Json(CheckAccessResponse {
                    access: "denied".to_string(),
                    ticket: Some(ticket),
                }),
            )
                .into_response();
            response.headers_mut().insert(WWW_AUTHENTICATE, header);
            Ok(response)
        }
    }
}

/// Exchange a permission ticket (plus optional claims) for an RPT
#[utoipa::path(
    post,
    path = "/uma/rpt",
    tag = UMA_TAG,
    request_body = RptRequest,
    responses(
        (status = 200, description = "RPT issued", body = TokenResponse),
        (status = 400, description = "Invalid ticket or claim token pairing"),
        (status = 403, description = "More claims required"),
    )
)]
async fn get_rpt(
    State(state): State<AppState>,
    Json(request): Json<RptRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let response = state
        .rpts
        .exchange_ticket(
            &request.rp_id,
            &request.ticket,
            request.claim_token.as_deref(),
            request.claim_token_format.as_deref(),
        )
        .await?;
    Ok(Json(response))
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/uma/protect", post(protect))
        .route("/uma/modify", post(modify))
        .route("/uma/check-access", post(check_access))
        .route("/uma/rpt", post(get_rpt))
}
