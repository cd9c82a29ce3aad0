use crate::openapi::HEALTH_TAG;
use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json,
};
use log::error;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Basic health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Health {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Health check handler, verifies the cache backend is reachable
#[utoipa::path(
    get,
    path = "/healthy",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Service is healthy", body = Health),
        (status = 503, description = "A backend is unavailable", body = Health)
    )
)]
async fn health_check(State(state): State<AppState>) -> Response {
    match state.store.health_check().await {
        Ok(()) => Json(Health {
            status: "ok".to_string(),
            error: None,
        })
        .into_response(),
        Err(err) => {
            error!("Cache health check failed: {}", err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Health {
                    status: "error".to_string(),
                    error: Some(err),
                }),
            )
                .into_response()
        }
    }
}

pub(crate) fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/healthy", get(health_check))
}
