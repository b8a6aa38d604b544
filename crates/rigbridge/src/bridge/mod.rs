//! Bridge between control sessions and the serial controller.
//!
//! Every session shares one [`Bridge`]. Each command is one exchange:
//! lock the link, send the encoded line, wait the settle interval, drain the
//! buffer. The lock is held across the whole exchange so that no other send can
//! land while a reply is still settling; that is the only thing attributing a
//! reply to its command.
//!
//! - **protocol**: command vocabulary, response modes, status reports

pub mod protocol;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::serial::{LinkError, LinkState, ReconnectBackoff, SerialLink};
use protocol::{Command, ResponseMode, StatusReport};

/// The link plus its reopen pacing; guarded together.
struct Channel {
    link: SerialLink,
    backoff: Option<ReconnectBackoff>,
}

impl Channel {
    fn maybe_reopen(&mut self) {
        if self.link.is_connected() {
            return;
        }
        let Some(backoff) = self.backoff.as_mut() else {
            return;
        };
        let now = Instant::now();
        if !backoff.should_retry(now) {
            return;
        }
        if self.link.reopen() {
            backoff.mark_success(now);
        } else {
            backoff.mark_failure(now);
        }
    }
}

struct Shared {
    channel: Mutex<Channel>,
    settle_interval: Duration,
    exchanges: AtomicU64,
}

impl Shared {
    /// One send→settle→drain exchange under the channel lock.
    async fn exchange(&self, command: Command) -> StatusReport {
        let mut channel = self.channel.lock().await;
        channel.maybe_reopen();

        let report = match channel.link.send(&command.encode()).await {
            Err(LinkError::Absent(fault)) => {
                debug!(%command, reason = fault.reason(), "Serial link absent, command not sent");
                StatusReport::NoConnection
            }
            Ok(()) => {
                tokio::time::sleep(self.settle_interval).await;
                match channel.link.receive_all() {
                    Ok(lines) => {
                        if command.response_mode() == ResponseMode::Latest && lines.len() > 1 {
                            let discarded: Vec<&str> =
                                lines[..lines.len() - 1].iter().map(|l| l.as_str()).collect();
                            debug!(%command, ?discarded, "Keeping latest controller line only");
                        }
                        StatusReport::collect(command.response_mode(), lines)
                    }
                    Err(LinkError::Absent(_)) => StatusReport::NoConnection,
                }
            }
        };

        self.exchanges.fetch_add(1, Ordering::Relaxed);
        report
    }
}

/// Mediates exclusive access to the serial controller.
///
/// Cheap to share behind an `Arc`; constructed once per process and injected
/// into every session.
pub struct Bridge {
    shared: Arc<Shared>,
    state_rx: watch::Receiver<LinkState>,
}

impl Bridge {
    pub fn new(link: SerialLink, config: BridgeConfig) -> Self {
        let state_rx = link.subscribe();
        let channel = Channel {
            link,
            backoff: config.reconnect.map(ReconnectBackoff::new),
        };
        Self {
            shared: Arc::new(Shared {
                channel: Mutex::new(channel),
                settle_interval: config.settle_interval,
                exchanges: AtomicU64::new(0),
            }),
            state_rx,
        }
    }

    /// Run one command exchange and report the controller's answer.
    ///
    /// Callers queue on the link lock. The exchange runs on its own task, so a
    /// caller that goes away mid-exchange does not cut the settle window short
    /// for whoever is next in line.
    pub async fn execute(&self, command: Command) -> StatusReport {
        let shared = Arc::clone(&self.shared);
        let exchange = tokio::spawn(async move { shared.exchange(command).await });
        match exchange.await {
            Ok(report) => report,
            Err(e) => {
                error!(%command, error = %e, "Serial exchange did not complete");
                StatusReport::NoCommunication
            }
        }
    }

    /// Parse a raw inbound frame and execute it. Unknown tokens never reach
    /// the serial link.
    pub async fn submit(&self, frame: &str) -> StatusReport {
        match Command::parse(frame) {
            Ok(command) => self.execute(command).await,
            Err(e) => {
                warn!(error = %e, "Rejected command");
                e.into()
            }
        }
    }

    /// Safety action for a session that went away: power the rig off.
    ///
    /// Fire-and-forget with respect to the controller's answer; no retry.
    pub async fn notify_session_closed(&self) {
        info!("Control session closed, powering rig off");
        let report = self.execute(Command::PowerOff).await;
        debug!(%report, "Disconnect power-off completed");
    }

    /// Current link state, including a device lost between exchanges.
    pub fn link_state(&self) -> LinkState {
        self.state_rx.borrow().clone()
    }

    /// Number of exchanges completed since startup.
    pub fn exchanges(&self) -> u64 {
        self.shared.exchanges.load(Ordering::Relaxed)
    }
}
