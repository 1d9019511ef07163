use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::docker::ContainerSettings;
use crate::operator::PortRange;
use crate::storage::{self, StoreConfig};
use crate::workspace::WorkspaceSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./logs"),
            service_name: "rhetor".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub ports: PortRange,
    pub container: ContainerSettings,
    pub workspace: WorkspaceSettings,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    /// Destroy (and save) every session on graceful shutdown.
    pub drain_on_shutdown: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ports: PortRange::default(),
            container: ContainerSettings::default(),
            workspace: WorkspaceSettings::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
            drain_on_shutdown: true,
        }
    }
}

impl Config {
    /// Defaults, then the YAML file if one is given, then environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = var("RHETOR_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("RHETOR_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("RHETOR_PORT is not a port: {port}"))?;
        }
        if let Some(root) = var("RHETOR_WORKSPACE_ROOT") {
            self.workspace.root = PathBuf::from(root);
        }
        if let Some(image) = var("RHETOR_IMAGE") {
            self.container.image = image;
        }
        if let Some(socket) = var("DOCKER_SOCKET") {
            self.container.docker_socket = Some(socket);
        }
        if let Some(dir) = var("RHETOR_LOG_DIR") {
            self.logging.dir = PathBuf::from(dir);
        }

        let bucket = var("RHETOR_STORE_BUCKET")
            .unwrap_or_else(|| self.store.bucket().to_string());
        if let Some(endpoint) = var("RHETOR_STORE_ENDPOINT") {
            self.store = StoreConfig::Http {
                endpoint,
                bucket,
                token: var("RHETOR_STORE_TOKEN"),
            };
        } else if let Some(profile) = var("RHETOR_AWS_PROFILE") {
            self.store = StoreConfig::S3 {
                bucket,
                region: var("RHETOR_AWS_REGION").unwrap_or_else(storage::default_region),
                profile: Some(profile),
                endpoint: None,
                path_style: false,
            };
        } else if let Some(path) = var("RHETOR_STORE_PATH") {
            self.store = StoreConfig::Local {
                path: PathBuf::from(path),
                bucket,
            };
        } else {
            match &mut self.store {
                StoreConfig::Local { bucket: b, .. } => *b = bucket,
                StoreConfig::Http { bucket: b, token, .. } => {
                    *b = bucket;
                    if let Some(t) = var("RHETOR_STORE_TOKEN") {
                        *token = Some(t);
                    }
                }
                StoreConfig::S3 { bucket: b, region, .. } => {
                    *b = bucket;
                    if let Some(r) = var("RHETOR_AWS_REGION") {
                        *region = r;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.ports.min >= self.ports.max {
            bail!(
                "port range [{}, {}) is empty",
                self.ports.min,
                self.ports.max
            );
        }
        let highest_app = u32::from(self.ports.max - 1) + u32::from(self.ports.app_offset);
        if highest_app > u32::from(u16::MAX) {
            bail!(
                "application ports would exceed 65535 (max {} + offset {})",
                self.ports.max,
                self.ports.app_offset
            );
        }
        if self.ports.app_offset < self.ports.max - self.ports.min {
            bail!("application port offset overlaps the development port range");
        }
        if self.container.memory_limit <= 0 {
            bail!("container memory limit must be positive");
        }
        if self.container.image.trim().is_empty() {
            bail!("container image must not be empty");
        }
        if self.store.bucket().is_empty() {
            bail!("store bucket must not be empty");
        }
        Ok(())
    }
}
