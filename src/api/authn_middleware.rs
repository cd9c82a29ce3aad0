use crate::errors::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use http::header::AUTHORIZATION;
use http::StatusCode;
use log::warn;

/// Rejects requests whose bearer token does not match the configured API
/// key. Applied as a layer over every protected route.
pub(crate) async fn authentication_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match token {
        Some(token) if token == state.config.api_key => Ok(next.run(request).await),
        Some(_) => {
            warn!("Rejected request with invalid API key");
            Err(ApiError::new("Invalid API key", StatusCode::UNAUTHORIZED))
        }
        None => Err(ApiError::new(
            "Missing Authorization header",
            StatusCode::UNAUTHORIZED,
        )),
    }
}
