mod ports;
mod registry;
mod session_manager;

pub use ports::{
    PortAllocator, PortPair, PortRange, DEFAULT_APP_PORT_OFFSET, DEFAULT_MAX_PORT,
    DEFAULT_MIN_PORT,
};
pub use registry::{Session, SessionClaim, SessionRegistry, SessionRelease};
pub use session_manager::{Provisioned, SessionManager};

use anyhow::Result;
use std::sync::Arc;

use crate::docker::{ContainerLifecycleManager, DockerClient};
use crate::shared::config::Config;
use crate::storage;
use crate::workspace::WorkspaceResolver;

/// Wires the Docker engine and the configured archive store into a manager.
pub async fn build(config: &Config) -> Result<Arc<SessionManager>> {
    tracing::info!("Starting session manager...");

    let engine = DockerClient::new(config.container.docker_socket.as_deref()).await?;
    let store = storage::build_store(&config.store).await?;

    let manager = SessionManager::new(
        PortAllocator::new(config.ports),
        ContainerLifecycleManager::new(Arc::new(engine), config.container.clone()),
        WorkspaceResolver::new(store, config.workspace.clone()),
    );

    Ok(Arc::new(manager))
}
