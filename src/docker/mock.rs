use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use super::{ContainerEngine, ContainerSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockState {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub name: String,
    pub spec: ContainerSpec,
    pub state: MockState,
}

/// In-memory engine with switchable failures.
#[derive(Debug, Default)]
pub struct MockEngine {
    containers: Mutex<HashMap<String, MockContainer>>,
    pub fail_create: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    pub fail_remove: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    pub fn container(&self, id: &str) -> Option<MockContainer> {
        self.containers().get(id).cloned()
    }

    /// Number of containers that exist in the engine, whatever their state.
    pub fn count(&self) -> usize {
        self.containers().len()
    }

    pub fn running(&self) -> usize {
        self.containers()
            .values()
            .filter(|c| c.state == MockState::Running)
            .count()
    }

    fn containers(&self) -> MutexGuard<'_, HashMap<String, MockContainer>> {
        self.containers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn create(&self, name: &str, spec: &ContainerSpec) -> anyhow::Result<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            anyhow::bail!("mock: create refused for {name}");
        }
        let mut containers = self.containers();
        if containers.values().any(|c| c.name == name) {
            anyhow::bail!("mock: container name {name} already in use");
        }
        let id = Uuid::new_v4().simple().to_string();
        containers.insert(
            id.clone(),
            MockContainer {
                name: name.to_string(),
                spec: spec.clone(),
                state: MockState::Created,
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> anyhow::Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("mock: start refused for {id}");
        }
        match self.containers().get_mut(id) {
            Some(c) => {
                c.state = MockState::Running;
                Ok(())
            }
            None => anyhow::bail!("mock: no such container {id}"),
        }
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> anyhow::Result<()> {
        if self.fail_stop.load(Ordering::SeqCst) {
            anyhow::bail!("mock: stop refused for {id}");
        }
        match self.containers().get_mut(id) {
            Some(c) => {
                c.state = MockState::Stopped;
                Ok(())
            }
            None => anyhow::bail!("mock: no such container {id}"),
        }
    }

    async fn remove(&self, id: &str, force: bool) -> anyhow::Result<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            anyhow::bail!("mock: remove refused for {id}");
        }
        let mut containers = self.containers();
        match containers.get(id).map(|c| c.state) {
            Some(MockState::Running) if !force => {
                anyhow::bail!("mock: container {id} is running")
            }
            Some(_) => {
                containers.remove(id);
                Ok(())
            }
            None => anyhow::bail!("mock: no such container {id}"),
        }
    }
}
