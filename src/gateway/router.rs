//! HTTP router

use std::time::Duration;

use axum::{
    Json, Router, middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::oauth::{
    ProxyState, bearer, handlers,
    metadata::{self, AUTHORIZATION_SERVER_PATH, PROTECTED_RESOURCE_PATH},
};

/// Create the router
///
/// Everything is public except the API under `state.resource_path`, which
/// sits behind [`bearer::require_bearer`]. Wrong methods on a known path get
/// axum's 405.
pub fn create_router(state: ProxyState, request_timeout: Duration) -> Router {
    let resource_path = state.resource_path.to_string();

    let api = Router::new()
        .route("/userinfo", get(bearer::userinfo))
        .fallback(bearer::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            bearer::require_bearer,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route(AUTHORIZATION_SERVER_PATH, get(metadata::authorization_server))
        .route(PROTECTED_RESOURCE_PATH, get(metadata::protected_resource))
        .route(
            &format!("{PROTECTED_RESOURCE_PATH}{resource_path}"),
            get(metadata::protected_resource),
        )
        .route("/oauth/register", post(handlers::register))
        .route("/oauth/authorize", get(handlers::authorize))
        .route("/oauth/callback", get(handlers::callback))
        .route("/oauth/token", post(handlers::token))
        .nest(&resource_path, api)
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}
