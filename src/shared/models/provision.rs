use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ProvisionError, Result};
use crate::operator::{PortRange, Provisioned, Session};
use crate::workspace::{validate_identifier, WorkspaceId};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProvisionRequest {
    #[serde(rename = "studentID")]
    pub student_id: String,
    pub course: String,
}

impl ProvisionRequest {
    pub fn validate(&self) -> Result<()> {
        WorkspaceId::new(&self.course, &self.student_id).map(|_| ())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProvisionResponse {
    #[serde(rename = "containerID")]
    pub container_id: String,
    #[serde(rename = "devPort")]
    pub dev_port: u16,
    #[serde(rename = "appPort")]
    pub app_port: u16,
}

impl From<Provisioned> for ProvisionResponse {
    fn from(p: Provisioned) -> Self {
        Self {
            container_id: p.container_id,
            dev_port: p.dev_port,
            app_port: p.app_port,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DestroyRequest {
    #[serde(rename = "containerID")]
    pub container_id: String,
    #[serde(rename = "studentID")]
    pub student_id: String,
    #[serde(rename = "devPort", alias = "port")]
    pub dev_port: u16,
}

impl DestroyRequest {
    pub fn validate(&self, range: PortRange) -> Result<()> {
        validate_identifier("studentID", &self.student_id)?;
        if self.container_id.trim().is_empty() {
            return Err(ProvisionError::InvalidRequest(
                "containerID must not be empty".to_string(),
            ));
        }
        if !range.contains(self.dev_port) {
            return Err(ProvisionError::InvalidRequest(format!(
                "devPort {} is outside [{}, {})",
                self.dev_port, range.min, range.max
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DestroyResponse {
    pub destroyed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PersistRequest {
    #[serde(rename = "studentID")]
    pub student_id: String,
    pub course: String,
}

impl PersistRequest {
    pub fn validate(&self) -> Result<()> {
        WorkspaceId::new(&self.course, &self.student_id).map(|_| ())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PersistResponse {
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    #[serde(rename = "studentID")]
    pub student_id: String,
    #[serde(rename = "containerID")]
    pub container_id: String,
    #[serde(rename = "devPort")]
    pub dev_port: u16,
    #[serde(rename = "appPort")]
    pub app_port: u16,
    pub workspace: String,
    pub started_at: String,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            student_id: session.student_id,
            container_id: session.container_id,
            dev_port: session.dev_port,
            app_port: session.app_port,
            workspace: session.workspace.to_string(),
            started_at: session.started_at.to_rfc3339(),
        }
    }
}
