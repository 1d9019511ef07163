use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::ProvisionError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Set on `/destroy` when the container is gone but the workspace upload failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destroyed: Option<bool>,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Provision(e) => match e {
                ProvisionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                ProvisionError::NoActiveSession { .. } => StatusCode::NOT_FOUND,
                ProvisionError::SessionAlreadyActive { .. }
                | ProvisionError::SessionMismatch { .. } => StatusCode::CONFLICT,
                ProvisionError::PortSpaceExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
                ProvisionError::WorkspaceLoadFailed { .. }
                | ProvisionError::WorkspaceSaveFailed { .. }
                | ProvisionError::ContainerCreateFailed { .. }
                | ProvisionError::StartFailedAfterCreate { .. }
                | ProvisionError::ContainerStopFailed { .. }
                | ProvisionError::ContainerRemoveFailed { .. } => StatusCode::BAD_GATEWAY,
                ProvisionError::UnknownContainer { .. }
                | ProvisionError::InvalidContainerState { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let destroyed = match &self {
            ApiError::Provision(e) if e.is_save_failure() => Some(true),
            _ => None,
        };
        let error = match &self {
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { destroyed, error })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provision_errors_map_to_status_codes() {
        let cases = [
            (
                ProvisionError::InvalidRequest("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ProvisionError::NoActiveSession { student_id: "s1".into() },
                StatusCode::NOT_FOUND,
            ),
            (
                ProvisionError::SessionAlreadyActive { student_id: "s1".into() },
                StatusCode::CONFLICT,
            ),
            (
                ProvisionError::SessionMismatch { student_id: "s1".into() },
                StatusCode::CONFLICT,
            ),
            (
                ProvisionError::PortSpaceExhausted { min: 3000, max: 3999 },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ProvisionError::ContainerCreateFailed { source: anyhow::anyhow!("boom") },
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn save_failure_is_reported_as_destroyed() {
        let err = ApiError::from(ProvisionError::WorkspaceSaveFailed {
            workspace: "M220P-s1".into(),
            source: anyhow::anyhow!("bucket unreachable"),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
