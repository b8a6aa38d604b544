//! Command vocabulary and status reports.
//!
//! The tokens are shared with the operator page and the handheld remote, and the
//! diagnostic strings are matched verbatim by existing operator tooling.

use std::fmt;
use std::str::FromStr;

use crate::serial::SerialLine;

pub const NO_CONNECTION: &str =
    "No connection to ClearCore and motors, try powering horse off and on again";
pub const NO_NEW_STATUS: &str = "No new status";
pub const NO_COMMUNICATION: &str = "No communication from horse";

/// A control command accepted from a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    PowerOn,
    PowerOff,
    /// Controller latches the stop until the rig is power-cycled.
    EmergencyStop,
    StatusQuery,
    Ping,
}

/// How the controller's reply is collected after the settle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Keep only the most recent buffered line.
    Latest,
    /// Keep every buffered line, in arrival order.
    Aggregate,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unsupported command: {0}")]
    UnknownCommand(String),
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::PowerOn,
        Command::PowerOff,
        Command::EmergencyStop,
        Command::StatusQuery,
        Command::Ping,
    ];

    /// Parse one inbound frame. Surrounding whitespace (the remote appends
    /// `\r\n`) is ignored; matching is otherwise exact.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let token = frame.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.token() == token)
            .ok_or_else(|| ProtocolError::UnknownCommand(token.to_string()))
    }

    pub fn token(self) -> &'static str {
        match self {
            Command::PowerOn => "on_h",
            Command::PowerOff => "off_h",
            Command::EmergencyStop => "em_stop",
            Command::StatusQuery => "stat_h",
            Command::Ping => "ping",
        }
    }

    /// Serial line for this command.
    ///
    /// The controller protocol has no request IDs; a correlation token would be
    /// attached here.
    pub fn encode(self) -> String {
        self.token().to_string()
    }

    pub fn response_mode(self) -> ResponseMode {
        match self {
            Command::StatusQuery => ResponseMode::Aggregate,
            _ => ResponseMode::Latest,
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Result of one command invocation, rendered as a single outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    /// Latest controller line.
    Line(SerialLine),
    /// Every line buffered since the previous drain (non-empty).
    Lines(Vec<SerialLine>),
    /// Link connected, controller said nothing.
    NoNewStatus,
    /// Serial device absent.
    NoConnection,
    /// The exchange did not complete.
    NoCommunication,
    Unsupported(String),
}

impl StatusReport {
    /// Build the report for a drained buffer according to `mode`.
    pub fn collect(mode: ResponseMode, mut lines: Vec<SerialLine>) -> Self {
        match mode {
            ResponseMode::Aggregate if lines.is_empty() => StatusReport::NoNewStatus,
            ResponseMode::Aggregate => StatusReport::Lines(lines),
            ResponseMode::Latest => match lines.pop() {
                Some(line) => StatusReport::Line(line),
                None => StatusReport::NoNewStatus,
            },
        }
    }

    /// True when the report carries controller output.
    pub fn is_controller_reply(&self) -> bool {
        matches!(self, StatusReport::Line(_) | StatusReport::Lines(_))
    }
}

impl From<ProtocolError> for StatusReport {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownCommand(token) => StatusReport::Unsupported(token),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusReport::Line(line) => write!(f, "{line}"),
            StatusReport::Lines(lines) => {
                for (i, line) in lines.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "{line}")?;
                }
                Ok(())
            }
            StatusReport::NoNewStatus => f.write_str(NO_NEW_STATUS),
            StatusReport::NoConnection => f.write_str(NO_CONNECTION),
            StatusReport::NoCommunication => f.write_str(NO_COMMUNICATION),
            StatusReport::Unsupported(token) => {
                write!(f, "{}", ProtocolError::UnknownCommand(token.clone()))
            }
        }
    }
}
