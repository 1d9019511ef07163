use serde::{Deserialize, Serialize};

/// Lifecycle of a student container as driven by this server.
///
/// The session path is `Requested → Created → Running → Stopping → Removed`.
/// A container that was created but never started leaves through the
/// separate terminal state `Discarded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerStatus {
    Requested,
    Created,
    Running,
    Stopping,
    Removed,
    Discarded,
}

impl ContainerStatus {
    pub fn can_transition_to(&self, target: &ContainerStatus) -> bool {
        match (self, target) {
            (ContainerStatus::Requested, ContainerStatus::Created) => true,
            (ContainerStatus::Created, ContainerStatus::Running) => true,

            (ContainerStatus::Running, ContainerStatus::Stopping) => true,

            // Start failed; the orphan is force-removed
            (ContainerStatus::Created, ContainerStatus::Discarded) => true,

            // Stop failed, the container keeps running
            (ContainerStatus::Stopping, ContainerStatus::Running) => true,
            (ContainerStatus::Stopping, ContainerStatus::Removed) => true,

            // Removed and Discarded are terminal
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ContainerStatus::Removed | ContainerStatus::Discarded)
    }
}
