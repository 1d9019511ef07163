use utoipa::OpenApi;

use crate::server::rest::error::ErrorResponse;
use crate::shared::models::{
    DestroyRequest, DestroyResponse, PersistRequest, PersistResponse, ProvisionRequest,
    ProvisionResponse, SessionResponse,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::server::rest::openapi::health,
        crate::server::rest::openapi::version,
        crate::server::rest::openapi::provision,
        crate::server::rest::openapi::destroy,
        crate::server::rest::openapi::persist,
        crate::server::rest::openapi::list_sessions,
        crate::server::rest::openapi::get_session,
    ),
    components(
        schemas(
            ProvisionRequest,
            ProvisionResponse,
            DestroyRequest,
            DestroyResponse,
            PersistRequest,
            PersistResponse,
            SessionResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Environments", description = "Provision and destroy student environments"),
        (name = "Sessions", description = "Active session inspection"),
    ),
    info(
        title = "Rhetor REST API",
        version = "0.1.0",
        description = "Per-student development environment provisioning",
        license(name = "MIT"),
    ),
    servers(
        (url = "/", description = "Current server"),
    ),
)]
pub struct ApiDoc;

// Health endpoints
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
)]
#[allow(dead_code)]
pub async fn health() {}

#[utoipa::path(
    get,
    path = "/version",
    tag = "Health",
    responses(
        (status = 200, description = "Service name and version", body = serde_json::Value),
    ),
)]
#[allow(dead_code)]
pub async fn version() {}

// Environment endpoints
#[utoipa::path(
    post,
    path = "/provision",
    tag = "Environments",
    request_body = ProvisionRequest,
    responses(
        (status = 200, description = "Environment running", body = ProvisionResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 409, description = "Student already has a session", body = ErrorResponse),
        (
            status = 502,
            description = "Container engine or archive store failed",
            body = ErrorResponse
        ),
        (status = 503, description = "No free port", body = ErrorResponse),
    ),
)]
#[allow(dead_code)]
pub async fn provision() {}

#[utoipa::path(
    post,
    path = "/destroy",
    tag = "Environments",
    request_body = DestroyRequest,
    responses(
        (
            status = 200,
            description = "Environment destroyed and workspace saved",
            body = DestroyResponse
        ),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 404, description = "No active session", body = ErrorResponse),
        (
            status = 409,
            description = "Container or port does not match the session",
            body = ErrorResponse
        ),
        (
            status = 502,
            description = "Teardown failed, or destroyed with `destroyed: true` \
                           but the workspace was not saved",
            body = ErrorResponse
        ),
    ),
)]
#[allow(dead_code)]
pub async fn destroy() {}

#[utoipa::path(
    post,
    path = "/workspaces/persist",
    tag = "Environments",
    request_body = PersistRequest,
    responses(
        (status = 200, description = "Workspace uploaded", body = PersistResponse),
        (status = 409, description = "Student has an active session", body = ErrorResponse),
        (status = 502, description = "No local workspace or upload failed", body = ErrorResponse),
    ),
)]
#[allow(dead_code)]
pub async fn persist() {}

// Session endpoints
#[utoipa::path(
    get,
    path = "/sessions",
    tag = "Sessions",
    responses(
        (status = 200, description = "Active sessions", body = Vec<SessionResponse>),
    ),
)]
#[allow(dead_code)]
pub async fn list_sessions() {}

#[utoipa::path(
    get,
    path = "/sessions/{student_id}",
    tag = "Sessions",
    params(
        ("student_id" = String, Path, description = "Student identifier"),
    ),
    responses(
        (status = 200, description = "Session details", body = SessionResponse),
        (status = 404, description = "No active session", body = ErrorResponse),
    ),
)]
#[allow(dead_code)]
pub async fn get_session() {}
