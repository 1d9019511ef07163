use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};
use crate::workspace::WorkspaceId;

use super::PortPair;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub student_id: String,
    pub container_id: String,
    pub dev_port: u16,
    pub app_port: u16,
    pub workspace: WorkspaceId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
enum Slot {
    // Being provisioned or torn down; blocks claims but is not visible
    Pending,
    Active(Session),
}

type Slots = HashMap<String, Slot>;

/// In-memory map from student to live session.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    slots: Arc<Mutex<Slots>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the student's slot while their environment is being built.
    pub fn claim(&self, student_id: &str) -> Result<SessionClaim> {
        let mut slots = self.slots();
        if slots.contains_key(student_id) {
            return Err(ProvisionError::SessionAlreadyActive {
                student_id: student_id.to_string(),
            });
        }
        slots.insert(student_id.to_string(), Slot::Pending);
        debug!(student = %student_id, "Claimed session slot");

        Ok(SessionClaim {
            slots: self.slots.clone(),
            student_id: student_id.to_string(),
            committed: false,
        })
    }

    /// Records a session in one step.
    pub fn begin(
        &self,
        student_id: &str,
        container_id: &str,
        ports: PortPair,
        workspace: WorkspaceId,
    ) -> Result<Session> {
        Ok(self.claim(student_id)?.begin(container_id, ports, workspace))
    }

    pub fn end(&self, student_id: &str) -> Result<SessionRelease> {
        self.take(student_id, |_| true)
    }

    /// Like `end`, but only when the caller's view of the session agrees
    /// with the registry. A mismatch leaves the session in place.
    pub fn end_matching(
        &self,
        student_id: &str,
        container_id: &str,
        dev_port: u16,
    ) -> Result<SessionRelease> {
        self.take(student_id, |session| {
            session.container_id == container_id && session.dev_port == dev_port
        })
    }

    pub fn get(&self, student_id: &str) -> Option<Session> {
        match self.slots().get(student_id) {
            Some(Slot::Active(session)) => Some(session.clone()),
            _ => None,
        }
    }

    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .slots()
            .values()
            .filter_map(|slot| match slot {
                Slot::Active(session) => Some(session.clone()),
                Slot::Pending => None,
            })
            .collect();
        sessions.sort_by(|a, b| a.student_id.cmp(&b.student_id));
        sessions
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while the student holds any slot, pending or active.
    pub fn is_claimed(&self, student_id: &str) -> bool {
        self.slots().contains_key(student_id)
    }

    fn take(
        &self,
        student_id: &str,
        accept: impl Fn(&Session) -> bool,
    ) -> Result<SessionRelease> {
        let mut slots = self.slots();
        let session = match slots.get(student_id) {
            Some(Slot::Active(session)) if accept(session) => session.clone(),
            Some(Slot::Active(_)) => {
                return Err(ProvisionError::SessionMismatch {
                    student_id: student_id.to_string(),
                })
            }
            _ => {
                return Err(ProvisionError::NoActiveSession {
                    student_id: student_id.to_string(),
                })
            }
        };
        slots.insert(student_id.to_string(), Slot::Pending);
        debug!(student = %student_id, container = %session.container_id, "Ending session");

        Ok(SessionRelease {
            slots: self.slots.clone(),
            session,
            reinstated: false,
        })
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        lock(&self.slots)
    }
}

fn lock(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A pending slot. Dropping it without calling `begin` frees the slot.
#[derive(Debug)]
pub struct SessionClaim {
    slots: Arc<Mutex<Slots>>,
    student_id: String,
    committed: bool,
}

impl SessionClaim {
    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn begin(
        mut self,
        container_id: &str,
        ports: PortPair,
        workspace: WorkspaceId,
    ) -> Session {
        let session = Session {
            student_id: self.student_id.clone(),
            container_id: container_id.to_string(),
            dev_port: ports.dev,
            app_port: ports.app,
            workspace,
            started_at: Utc::now(),
        };
        lock(&self.slots).insert(self.student_id.clone(), Slot::Active(session.clone()));
        self.committed = true;

        info!(
            student = %session.student_id,
            container = %session.container_id,
            port = session.dev_port,
            "Session started"
        );
        session
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        if !self.committed {
            lock(&self.slots).remove(&self.student_id);
            debug!(student = %self.student_id, "Released unused session slot");
        }
    }
}

/// A session taken out of the registry. The student's slot stays blocked
/// until this is dropped, unless the session is reinstated.
#[derive(Debug)]
pub struct SessionRelease {
    slots: Arc<Mutex<Slots>>,
    session: Session,
    reinstated: bool,
}

impl SessionRelease {
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Puts the session back, e.g. when its container could not be torn down.
    pub fn reinstate(mut self) {
        lock(&self.slots).insert(
            self.session.student_id.clone(),
            Slot::Active(self.session.clone()),
        );
        self.reinstated = true;
        info!(student = %self.session.student_id, "Session reinstated");
    }
}

impl Drop for SessionRelease {
    fn drop(&mut self) {
        if !self.reinstated {
            lock(&self.slots).remove(&self.session.student_id);
            info!(
                student = %self.session.student_id,
                container = %self.session.container_id,
                "Session ended"
            );
        }
    }
}
