use thiserror::Error;

use crate::docker::ContainerStatus;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("no free development port in [{min}, {max})")]
    PortSpaceExhausted { min: u16, max: u16 },

    #[error("failed to load workspace {workspace}: {source:#}")]
    WorkspaceLoadFailed {
        workspace: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to save workspace {workspace}: {source:#}")]
    WorkspaceSaveFailed {
        workspace: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to create container: {source:#}")]
    ContainerCreateFailed {
        #[source]
        source: anyhow::Error,
    },

    #[error("container {container_id} was created but failed to start: {source:#}")]
    StartFailedAfterCreate {
        container_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to stop container {container_id}: {source:#}")]
    ContainerStopFailed {
        container_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to remove container {container_id}: {source:#}")]
    ContainerRemoveFailed {
        container_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("container {container_id} is not managed by this server")]
    UnknownContainer { container_id: String },

    #[error("container {container_id} cannot move from {from:?} to {to:?}")]
    InvalidContainerState {
        container_id: String,
        from: ContainerStatus,
        to: ContainerStatus,
    },

    #[error("student {student_id} already has an active session")]
    SessionAlreadyActive { student_id: String },

    #[error("student {student_id} has no active session")]
    NoActiveSession { student_id: String },

    #[error("session of student {student_id} does not match the given container or port")]
    SessionMismatch { student_id: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProvisionError {
    /// True when the container side of a destroy already completed and only
    /// the workspace upload is outstanding.
    pub fn is_save_failure(&self) -> bool {
        matches!(self, ProvisionError::WorkspaceSaveFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
