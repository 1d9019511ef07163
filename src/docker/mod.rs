mod client;
mod container;
mod lifecycle;
mod mock;

pub use client::DockerClient;
pub use container::ContainerStatus;
pub use lifecycle::ContainerLifecycleManager;
pub use mock::MockEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_IMAGE: &str = "mflix-python:latest";
pub const DEFAULT_MEMORY_LIMIT: i64 = 2 * 1024 * 1024 * 1024; // 2 GiB
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    pub image: String,
    pub dev_container_port: u16,
    pub app_container_port: u16,
    pub mount_target: String,
    pub memory_limit: i64, // bytes
    pub stop_timeout_secs: u64,
    pub docker_socket: Option<String>,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            dev_container_port: 3000,
            app_container_port: 5000,
            mount_target: "/home/project".to_string(),
            memory_limit: DEFAULT_MEMORY_LIMIT,
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            docker_socket: None,
        }
    }
}

impl ContainerSettings {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: String,
}

/// Everything the engine needs to create one student container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub student_id: String,
    pub ports: Vec<PortMapping>,
    pub bind: BindMount,
    pub memory_limit: i64,
    pub stop_timeout: Duration,
}

/// The container runtime as seen by the lifecycle manager.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn create(&self, name: &str, spec: &ContainerSpec) -> anyhow::Result<String>;

    async fn start(&self, id: &str) -> anyhow::Result<()>;

    async fn stop(&self, id: &str, timeout: Duration) -> anyhow::Result<()>;

    async fn remove(&self, id: &str, force: bool) -> anyhow::Result<()>;
}
