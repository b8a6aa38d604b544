//! Health status types for the rigbridge service.

use serde::Serialize;

use crate::serial::{LinkFault, LinkState};

/// Overall service health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    /// Serial link connected; commands reach the controller.
    Ready,
    /// Serving sessions without a controller; commands return the
    /// no-connection diagnostic.
    Degraded,
}

impl From<&LinkState> for Health {
    fn from(state: &LinkState) -> Self {
        if state.is_connected() {
            Health::Ready
        } else {
            Health::Degraded
        }
    }
}

/// Serializable view of the serial link state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkHealth {
    Connected,
    NeverOpened { reason: String },
    Lost { reason: String },
}

impl From<&LinkState> for LinkHealth {
    fn from(state: &LinkState) -> Self {
        match state {
            LinkState::Connected => LinkHealth::Connected,
            LinkState::Disconnected(LinkFault::NeverOpened { reason }) => LinkHealth::NeverOpened {
                reason: reason.clone(),
            },
            LinkState::Disconnected(LinkFault::Lost { reason }) => LinkHealth::Lost {
                reason: reason.clone(),
            },
        }
    }
}
