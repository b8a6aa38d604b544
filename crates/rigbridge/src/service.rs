//! ControlService: transport-agnostic facade over the bridge.
//!
//! This service owns:
//! - The shared Bridge (and through it, the serial link)
//! - Active session accounting
//! - Shutdown coordination
//!
//! Transports (WebSocket today) open sessions through this service and report
//! its health snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;

use crate::bridge::Bridge;
use crate::bridge::protocol::Command;
use crate::health::{Health, LinkHealth};
use crate::session::{ActiveSession, ControlSession};
use crate::version::VersionInfo;

/// Snapshot of service health for transports to query.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub state: Health,
    pub link: LinkHealth,
    pub active_sessions: usize,
    pub exchanges: u64,
    pub version: VersionInfo,
}

impl HealthSnapshot {
    pub fn is_ready(&self) -> bool {
        self.state == Health::Ready
    }
}

pub struct ControlService {
    bridge: Arc<Bridge>,
    active_sessions: Arc<AtomicUsize>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    version: VersionInfo,
}

impl ControlService {
    pub fn new(bridge: Bridge) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            bridge: Arc::new(bridge),
            active_sessions: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
            shutdown_rx,
            version: VersionInfo::new(),
        }
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    /// Open a counted session bound to the shared bridge.
    pub fn open_session(&self) -> ControlSession {
        ControlSession::open(Arc::clone(&self.bridge))
            .with_active(ActiveSession::register(&self.active_sessions))
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Acquire)
    }

    pub fn health(&self) -> HealthSnapshot {
        let link = self.bridge.link_state();
        HealthSnapshot {
            state: Health::from(&link),
            link: LinkHealth::from(&link),
            active_sessions: self.active_sessions(),
            exchanges: self.bridge.exchanges(),
            version: self.version.clone(),
        }
    }

    /// Power the rig off before the process stops serving.
    pub async fn shutdown(&self) {
        tracing::info!("Service stopping, powering rig off");
        let report = self.bridge.execute(Command::PowerOff).await;
        tracing::debug!(%report, "Shutdown power-off completed");
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}
