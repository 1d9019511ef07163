use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::server::rest::logging_middleware::request_logging_middleware;
use crate::server::rest::{handlers, openapi::ApiDoc};
use crate::shared::models::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/api-docs/openapi.json", get(openapi_json));

    let session_routes = Router::new()
        .route("/provision", post(handlers::sessions::provision))
        .route("/destroy", post(handlers::sessions::destroy))
        .route("/workspaces/persist", post(handlers::sessions::persist))
        .route("/sessions", get(handlers::sessions::list_sessions))
        .route("/sessions/{student_id}", get(handlers::sessions::get_session));

    public_routes
        .merge(session_routes)
        .with_state(state)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
