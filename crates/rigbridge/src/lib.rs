//! rigbridge: WebSocket control sessions for a serial motor controller.

mod health;
mod version;

pub mod bridge;
pub mod config;
pub mod serial;
pub mod service;
pub mod session;
pub mod transport;

pub use bridge::Bridge;
pub use bridge::protocol::{Command, ProtocolError, ResponseMode, StatusReport};
pub use config::{BridgeConfig, Config, ConfigError, ReconnectPolicy, SerialConfig, ServerConfig};
pub use health::{Health, LinkHealth};
pub use serial::{LinkError, LinkFault, LinkState, SerialLine, SerialLink};
pub use service::{ControlService, HealthSnapshot};
pub use session::{ControlSession, SessionId, SessionState};
pub use version::{RIGBRIDGE_VERSION, VersionInfo};
