use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

use super::{
    BindMount, ContainerEngine, ContainerSettings, ContainerSpec, ContainerStatus, PortMapping,
};
use crate::error::{ProvisionError, Result};
use crate::operator::PortPair;

/// Drives the engine through create → start and stop → remove while keeping
/// track of where each container is in its lifecycle.
#[derive(Clone)]
pub struct ContainerLifecycleManager {
    engine: Arc<dyn ContainerEngine>,
    settings: ContainerSettings,
    states: Arc<Mutex<HashMap<String, Tracked>>>,
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
    status: ContainerStatus,
    // An engine call is in flight for this container
    busy: bool,
}

impl ContainerLifecycleManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, settings: ContainerSettings) -> Self {
        Self {
            engine,
            settings,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    pub fn spec_for(&self, student_id: &str, bind_path: &Path, ports: PortPair) -> ContainerSpec {
        ContainerSpec {
            image: self.settings.image.clone(),
            student_id: student_id.to_string(),
            ports: vec![
                PortMapping {
                    container_port: self.settings.dev_container_port,
                    host_port: ports.dev,
                },
                PortMapping {
                    container_port: self.settings.app_container_port,
                    host_port: ports.app,
                },
            ],
            bind: BindMount {
                source: bind_path.to_path_buf(),
                target: self.settings.mount_target.clone(),
            },
            memory_limit: self.settings.memory_limit,
            stop_timeout: self.settings.stop_timeout(),
        }
    }

    /// Creates and starts a container. A start failure leaves the created
    /// container behind and is reported as `StartFailedAfterCreate` so the
    /// caller can `discard` it.
    pub async fn create(
        &self,
        name: &str,
        student_id: &str,
        bind_path: &Path,
        ports: PortPair,
    ) -> Result<String> {
        let spec = self.spec_for(student_id, bind_path, ports);
        info!(
            container = %name,
            image = %spec.image,
            dev_port = ports.dev,
            app_port = ports.app,
            "Requesting container"
        );

        self.request(name)?;
        let container_id = match self.engine.create(name, &spec).await {
            Ok(id) => id,
            Err(source) => {
                self.states().remove(name);
                return Err(ProvisionError::ContainerCreateFailed { source });
            }
        };
        self.assign_id(name, &container_id)?;

        if let Err(source) = self.engine.start(&container_id).await {
            error!(
                container = %container_id,
                "Container created but failed to start: {:#}", source
            );
            self.settle(&container_id);
            return Err(ProvisionError::StartFailedAfterCreate {
                container_id,
                source,
            });
        }
        self.advance(&container_id, ContainerStatus::Running)?;

        info!(container = %container_id, "Container running");
        Ok(container_id)
    }

    /// Graceful stop followed by removal.
    pub async fn destroy(&self, container_id: &str) -> Result<()> {
        let already_stopped = self.begin_teardown(container_id)?;

        if !already_stopped {
            let timeout = self.settings.stop_timeout();
            if let Err(source) = self.engine.stop(container_id, timeout).await {
                self.advance(container_id, ContainerStatus::Running)?;
                return Err(ProvisionError::ContainerStopFailed {
                    container_id: container_id.to_string(),
                    source,
                });
            }
        }

        if let Err(source) = self.engine.remove(container_id, false).await {
            self.settle(container_id);
            return Err(ProvisionError::ContainerRemoveFailed {
                container_id: container_id.to_string(),
                source,
            });
        }
        self.advance(container_id, ContainerStatus::Removed)?;

        info!(container = %container_id, "Container removed");
        Ok(())
    }

    /// Forced removal of a container that was created but never ran. Only a
    /// `Created` container can be discarded.
    pub async fn discard(&self, container_id: &str) -> Result<()> {
        self.claim(container_id, ContainerStatus::Discarded)?;

        if let Err(source) = self.engine.remove(container_id, true).await {
            warn!(container = %container_id, "Failed to discard container: {:#}", source);
            self.settle(container_id);
            return Err(ProvisionError::ContainerRemoveFailed {
                container_id: container_id.to_string(),
                source,
            });
        }
        self.advance(container_id, ContainerStatus::Discarded)?;

        info!(container = %container_id, "Discarded container");
        Ok(())
    }

    /// Status by container id, or by name while the engine has not assigned
    /// an id yet.
    pub fn status(&self, container_id: &str) -> Option<ContainerStatus> {
        self.states().get(container_id).map(|t| t.status)
    }

    /// Containers requested from the engine that have not been removed yet.
    pub fn tracked(&self) -> usize {
        self.states().len()
    }

    // Requested entries are keyed by name until the engine returns an id
    fn request(&self, name: &str) -> Result<()> {
        let mut states = self.states();
        if let Some(existing) = states.get(name) {
            return Err(ProvisionError::InvalidContainerState {
                container_id: name.to_string(),
                from: existing.status,
                to: ContainerStatus::Requested,
            });
        }
        states.insert(
            name.to_string(),
            Tracked {
                status: ContainerStatus::Requested,
                busy: true,
            },
        );
        Ok(())
    }

    fn assign_id(&self, name: &str, container_id: &str) -> Result<()> {
        let mut states = self.states();
        let from = states
            .remove(name)
            .map(|t| t.status)
            .ok_or_else(|| ProvisionError::UnknownContainer {
                container_id: name.to_string(),
            })?;

        let to = ContainerStatus::Created;
        if !from.can_transition_to(&to) {
            return Err(ProvisionError::InvalidContainerState {
                container_id: container_id.to_string(),
                from,
                to,
            });
        }
        states.insert(container_id.to_string(), Tracked { status: to, busy: true });
        Ok(())
    }

    /// Moves the container to `Stopping` and marks it busy. Returns true when
    /// it was already `Stopping`, i.e. an earlier stop succeeded but the
    /// removal did not.
    fn begin_teardown(&self, container_id: &str) -> Result<bool> {
        let mut states = self.states();
        let tracked = states
            .get_mut(container_id)
            .ok_or_else(|| ProvisionError::UnknownContainer {
                container_id: container_id.to_string(),
            })?;

        let resumable = tracked.status == ContainerStatus::Stopping;
        let allowed = resumable || tracked.status.can_transition_to(&ContainerStatus::Stopping);
        if tracked.busy || !allowed {
            return Err(ProvisionError::InvalidContainerState {
                container_id: container_id.to_string(),
                from: tracked.status,
                to: ContainerStatus::Stopping,
            });
        }

        tracked.status = ContainerStatus::Stopping;
        tracked.busy = true;
        Ok(resumable)
    }

    /// Marks the container busy if it may move to `to`, without moving it.
    fn claim(&self, container_id: &str, to: ContainerStatus) -> Result<()> {
        let mut states = self.states();
        let tracked = states
            .get_mut(container_id)
            .ok_or_else(|| ProvisionError::UnknownContainer {
                container_id: container_id.to_string(),
            })?;

        if tracked.busy || !tracked.status.can_transition_to(&to) {
            return Err(ProvisionError::InvalidContainerState {
                container_id: container_id.to_string(),
                from: tracked.status,
                to,
            });
        }
        tracked.busy = true;
        Ok(())
    }

    fn settle(&self, container_id: &str) {
        if let Some(tracked) = self.states().get_mut(container_id) {
            tracked.busy = false;
        }
    }

    fn advance(&self, container_id: &str, to: ContainerStatus) -> Result<()> {
        let mut states = self.states();
        let from = states
            .get(container_id)
            .map(|t| t.status)
            .ok_or_else(|| ProvisionError::UnknownContainer {
                container_id: container_id.to_string(),
            })?;

        if !from.can_transition_to(&to) {
            return Err(ProvisionError::InvalidContainerState {
                container_id: container_id.to_string(),
                from,
                to,
            });
        }

        if to.is_terminal() {
            states.remove(container_id);
        } else {
            states.insert(container_id.to_string(), Tracked { status: to, busy: false });
        }
        Ok(())
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, Tracked>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
