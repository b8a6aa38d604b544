//! ControlSession - one network peer driving the rig.
//!
//! A session is `Open` until its transport goes away, then `Closed` for good.
//! Closing issues the disconnect power-off exactly once, whether it happens
//! through [`ControlSession::close`] or because the session was dropped while
//! still open.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::bridge::Bridge;
use crate::bridge::protocol::StatusReport;

/// Unique identifier for a control session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// Counts a session as active until released or dropped.
pub(crate) struct ActiveSession {
    counter: Arc<AtomicUsize>,
}

impl ActiveSession {
    pub(crate) fn register(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct ControlSession {
    id: SessionId,
    bridge: Arc<Bridge>,
    state: SessionState,
    active: Option<ActiveSession>,
}

impl ControlSession {
    pub fn open(bridge: Arc<Bridge>) -> Self {
        let id = SessionId::new();
        info!(session = %id, "Control session opened");
        Self {
            id,
            bridge,
            state: SessionState::Open,
            active: None,
        }
    }

    pub(crate) fn with_active(mut self, active: ActiveSession) -> Self {
        self.active = Some(active);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle one inbound frame; the report is fully resolved before the next
    /// frame should be read. Returns `None` once the session is closed.
    pub async fn on_frame(&mut self, frame: &str) -> Option<StatusReport> {
        if self.state == SessionState::Closed {
            warn!(session = %self.id, "Frame received on closed session, ignoring");
            return None;
        }

        info!(session = %self.id, frame = frame.trim(), "Incoming message");
        let report = self.bridge.submit(frame).await;
        if report.is_controller_reply() {
            debug!(session = %self.id, %report, "Controller replied");
        } else {
            debug!(session = %self.id, ?report, "No controller reply");
        }
        Some(report)
    }

    /// Close the session and power the rig off. Idempotent.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.active.take();
        info!(session = %self.id, "Control session closing");
        self.bridge.notify_session_closed().await;
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(session = %self.id, "Session dropped while open, scheduling power-off");
                let bridge = Arc::clone(&self.bridge);
                handle.spawn(async move { bridge.notify_session_closed().await });
            }
            Err(_) => {
                error!(
                    session = %self.id,
                    "Session dropped outside runtime; disconnect power-off not sent"
                );
            }
        }
    }
}
