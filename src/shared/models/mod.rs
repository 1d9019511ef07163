use std::sync::Arc;

use crate::operator::{PortRange, SessionManager};

pub mod provision;

pub use provision::{
    DestroyRequest, DestroyResponse, PersistRequest, PersistResponse, ProvisionRequest,
    ProvisionResponse, SessionResponse,
};

// Application state
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    pub fn port_range(&self) -> PortRange {
        self.sessions.ports().range()
    }
}
