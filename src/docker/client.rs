use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{ContainerEngine, ContainerSpec};

pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    pub async fn new(socket_path: Option<&str>) -> Result<Self> {
        let docker = if let Some(socket) = socket_path {
            Docker::connect_with_socket(socket, 120, &API_DEFAULT_VERSION)?
        } else {
            Docker::connect_with_socket_defaults()?
        };

        // Test connection
        let version = docker
            .version()
            .await
            .context("Failed to connect to Docker daemon")?;

        info!(
            "Connected to Docker daemon version: {}",
            version.version.unwrap_or_default()
        );

        Ok(Self { docker })
    }

    pub async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling Docker image: {}", image);

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(info) = stream.next().await {
            match info {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    error!("Error pulling image: {}", e);
                    return Err(anyhow::anyhow!("Failed to pull image {}: {}", image, e));
                }
            }
        }

        info!("Successfully pulled image: {}", image);
        Ok(())
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_err() {
            self.pull_image(image).await?;
        }
        Ok(())
    }

    fn container_config(spec: &ContainerSpec) -> Config<String> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .ports
            .iter()
            .map(|p| (format!("{}/tcp", p.container_port), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .ports
            .iter()
            .map(|p| {
                (
                    format!("{}/tcp", p.container_port),
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(p.host_port.to_string()),
                    }]),
                )
            })
            .collect();

        let mut labels = HashMap::new();
        labels.insert("rhetor.managed".to_string(), "true".to_string());
        labels.insert("rhetor.student".to_string(), spec.student_id.clone());

        let host_config = HostConfig {
            memory: Some(spec.memory_limit),
            port_bindings: Some(port_bindings),
            mounts: Some(vec![Mount {
                target: Some(spec.bind.target.clone()),
                source: Some(spec.bind.source.to_string_lossy().into_owned()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(false),
                ..Default::default()
            }]),
            auto_remove: Some(false),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            exposed_ports: Some(exposed_ports),
            labels: Some(labels),
            host_config: Some(host_config),
            stop_timeout: Some(spec.stop_timeout.as_secs() as i64),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerClient {
    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        self.ensure_image(&spec.image).await?;

        let options = CreateContainerOptions {
            name,
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), Self::container_config(spec))
            .await
            .context("Failed to create container")?;

        for warning in &response.warnings {
            debug!("Docker warning for {}: {}", name, warning);
        }

        info!("Created container {} with ID: {}", name, response.id);
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start container")?;

        info!("Started container: {}", id);
        Ok(())
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };

        self.docker
            .stop_container(id, Some(options))
            .await
            .context("Failed to stop container")?;

        info!("Stopped container: {}", id);
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        self.docker
            .remove_container(id, Some(options))
            .await
            .context("Failed to remove container")?;

        info!("Removed container: {}", id);
        Ok(())
    }
}
