use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{PortAllocator, PortPair, Session, SessionRegistry};
use crate::docker::ContainerLifecycleManager;
use crate::error::{ProvisionError, Result};
use crate::workspace::{LoadedWorkspace, WorkspaceId, WorkspaceOrigin, WorkspaceResolver};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provisioned {
    pub container_id: String,
    pub dev_port: u16,
    pub app_port: u16,
    pub workspace: WorkspaceId,
    pub origin: WorkspaceOrigin,
}

/// Provisions and destroys student environments. Owns all shared state:
/// the reserved ports and the student → session map.
pub struct SessionManager {
    ports: PortAllocator,
    registry: SessionRegistry,
    containers: ContainerLifecycleManager,
    workspaces: WorkspaceResolver,
}

impl SessionManager {
    pub fn new(
        ports: PortAllocator,
        containers: ContainerLifecycleManager,
        workspaces: WorkspaceResolver,
    ) -> Self {
        Self {
            ports,
            registry: SessionRegistry::new(),
            containers,
            workspaces,
        }
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn containers(&self) -> &ContainerLifecycleManager {
        &self.containers
    }

    pub fn workspaces(&self) -> &WorkspaceResolver {
        &self.workspaces
    }

    pub fn session(&self, student_id: &str) -> Option<Session> {
        self.registry.get(student_id)
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.registry.sessions()
    }

    /// Reserve ports → claim the student's slot → restore workspace →
    /// create and start container → record session. Every failure after
    /// the reservation gives the ports back.
    pub async fn provision(&self, student_id: &str, course: &str) -> Result<Provisioned> {
        let workspace = WorkspaceId::new(course, student_id)?;
        let ports = self.ports.reserve()?;

        let result = self
            .provision_with(student_id, course, workspace, ports)
            .await;
        if let Err(e) = &result {
            self.ports.release(ports.dev);
            warn!(student = %student_id, port = ports.dev, "Provisioning failed: {}", e);
        }
        result
    }

    async fn provision_with(
        &self,
        student_id: &str,
        course: &str,
        workspace: WorkspaceId,
        ports: PortPair,
    ) -> Result<Provisioned> {
        let claim = self.registry.claim(student_id)?;

        let loaded = self.workspaces.load(&workspace, course).await?;

        let name = container_name(&workspace);
        let container_id = match self
            .containers
            .create(&name, student_id, &loaded.bind_path, ports)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.abandon(&e, &loaded).await;
                return Err(e);
            }
        };

        let session = claim.begin(&container_id, ports, workspace);
        info!(
            student = %student_id,
            container = %container_id,
            dev_port = ports.dev,
            app_port = ports.app,
            "Provisioned environment"
        );

        Ok(Provisioned {
            container_id,
            dev_port: session.dev_port,
            app_port: session.app_port,
            workspace: session.workspace,
            origin: loaded.origin,
        })
    }

    async fn abandon(&self, cause: &ProvisionError, loaded: &LoadedWorkspace) {
        if let ProvisionError::StartFailedAfterCreate { container_id, .. } = cause {
            if let Err(e) = self.containers.discard(container_id).await {
                error!(
                    container = %container_id,
                    "Orphaned container needs manual removal: {}",
                    e
                );
            }
        }
        self.workspaces.discard(loaded).await;
    }

    /// End session → stop and remove container → save workspace → release
    /// port. Returns the archive location.
    ///
    /// A container teardown failure puts the session back so the destroy can
    /// be retried. A save failure is reported after the port and session are
    /// gone; the workspace stays on disk for `persist`.
    pub async fn destroy(
        &self,
        student_id: &str,
        container_id: &str,
        dev_port: u16,
    ) -> Result<String> {
        let release = self.registry.end_matching(student_id, container_id, dev_port)?;
        let session = release.session().clone();

        if let Err(e) = self.containers.destroy(&session.container_id).await {
            error!(
                student = %student_id,
                container = %session.container_id,
                "Teardown failed: {}",
                e
            );
            release.reinstate();
            return Err(e);
        }

        let saved = self.workspaces.save(&session.workspace).await;
        self.ports.release(session.dev_port);
        drop(release);

        match &saved {
            Ok(location) => info!(
                student = %student_id,
                container = %session.container_id,
                location = %location,
                "Destroyed environment"
            ),
            Err(e) => error!(
                student = %student_id,
                workspace = %session.workspace,
                "Environment destroyed but workspace was not saved: {}",
                e
            ),
        }
        saved
    }

    /// Uploads a workspace left on disk by a failed save.
    pub async fn persist(&self, student_id: &str, course: &str) -> Result<String> {
        let workspace = WorkspaceId::new(course, student_id)?;
        let _claim = self.registry.claim(student_id)?;
        self.workspaces.save(&workspace).await
    }

    /// Destroys every active session. Used on shutdown so no workspace is
    /// left only on local disk.
    pub async fn drain(&self) -> usize {
        let sessions = self.registry.sessions();
        if sessions.is_empty() {
            return 0;
        }
        info!(sessions = sessions.len(), "Draining active sessions");

        let results = join_all(sessions.iter().map(|session| {
            self.destroy(&session.student_id, &session.container_id, session.dev_port)
        }))
        .await;

        let mut drained = 0;
        for (session, result) in sessions.iter().zip(results) {
            match result {
                Ok(_) => drained += 1,
                Err(e) => error!(student = %session.student_id, "Failed to drain session: {}", e),
            }
        }
        drained
    }
}

fn container_name(workspace: &WorkspaceId) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("rhetor-{}-{}", workspace, &suffix[..8])
}
