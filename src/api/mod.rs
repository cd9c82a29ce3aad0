mod authn_middleware;
pub(crate) mod health;
pub(crate) mod site;
pub(crate) mod uma;

use crate::api::authn_middleware::authentication_middleware;
use crate::state::AppState;
use axum::{middleware, routing::get, Router};

/// Combines all API routes into a single router
pub(super) fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(public_routes())
        .merge(protected_routes(state))
}

/// Routes the authorization server calls back into without credentials
fn public_routes() -> Router<AppState> {
    Router::new().route("/request-object/{key}", get(site::get_request_object))
}

/// Creates a router for protected routes that require API key authentication
fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(site::router())
        .merge(uma::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            authentication_middleware,
        ))
}
