use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::error::ProvisionError;
use crate::server::rest::error::{ApiError, ApiResult};
use crate::shared::models::{
    AppState, DestroyRequest, DestroyResponse, PersistRequest, PersistResponse, ProvisionRequest,
    ProvisionResponse, SessionResponse,
};

/// Runs orchestration on its own task so a dropped connection cannot cancel
/// it between acquiring and releasing resources.
async fn detached<T, F>(work: F) -> ApiResult<T>
where
    F: Future<Output = crate::error::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("orchestration task failed: {e}")))?
        .map_err(ApiError::from)
}

pub async fn provision(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ProvisionRequest>, JsonRejection>,
) -> ApiResult<Json<ProvisionResponse>> {
    let Json(req) = payload?;
    req.validate()?;
    info!(student = %req.student_id, course = %req.course, "Provision requested");

    let sessions = state.sessions.clone();
    let provisioned =
        detached(async move { sessions.provision(&req.student_id, &req.course).await }).await?;

    Ok(Json(provisioned.into()))
}

pub async fn destroy(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DestroyRequest>, JsonRejection>,
) -> ApiResult<Json<DestroyResponse>> {
    let Json(req) = payload?;
    req.validate(state.port_range())?;
    info!(
        student = %req.student_id,
        container = %req.container_id,
        port = req.dev_port,
        "Destroy requested"
    );

    let sessions = state.sessions.clone();
    detached(async move {
        sessions
            .destroy(&req.student_id, &req.container_id, req.dev_port)
            .await
    })
    .await?;

    Ok(Json(DestroyResponse {
        destroyed: true,
        error: None,
    }))
}

pub async fn persist(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PersistRequest>, JsonRejection>,
) -> ApiResult<Json<PersistResponse>> {
    let Json(req) = payload?;
    req.validate()?;

    let sessions = state.sessions.clone();
    let location =
        detached(async move { sessions.persist(&req.student_id, &req.course).await }).await?;

    Ok(Json(PersistResponse { location }))
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionResponse>> {
    Json(
        state
            .sessions
            .sessions()
            .into_iter()
            .map(SessionResponse::from)
            .collect(),
    )
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(student_id): Path<String>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state
        .sessions
        .session(&student_id)
        .ok_or(ProvisionError::NoActiveSession { student_id })?;

    Ok(Json(session.into()))
}
