//! Runtime configuration for the serial link, the bridge, and the HTTP server.
//!
//! Values resolve in order: command-line flag, then environment variable, then
//! the built-in default. Resolution is pure so it can be tested without touching
//! the process environment.

use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_DEVICE: &str = "/dev/clearCore";
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);
pub const DEFAULT_RECONNECT_INITIAL: Duration = Duration::from_secs(2);
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);

pub const ENV_DEVICE: &str = "RIGBRIDGE_DEVICE";
pub const ENV_BAUD: &str = "RIGBRIDGE_BAUD";
pub const ENV_HOST: &str = "RIGBRIDGE_HOST";
pub const ENV_PORT: &str = "RIGBRIDGE_PORT";
pub const ENV_SETTLE_MS: &str = "RIGBRIDGE_SETTLE_MS";
pub const ENV_RECONNECT_MS: &str = "RIGBRIDGE_RECONNECT_MS";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{flag} requires a value")]
    MissingValue { flag: String },

    #[error("invalid value '{value}' for {key}: expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),

    /// `--help` was requested; not a failure, but the caller should print usage.
    #[error("help requested")]
    HelpRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device path, e.g. a udev symlink to the controller's USB serial port.
    pub device: String,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Exponential backoff bounds for reopening a lost serial device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: DEFAULT_RECONNECT_INITIAL,
            max: DEFAULT_RECONNECT_MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Fixed wait between sending a command and draining the controller's reply.
    ///
    /// The controller protocol carries no request IDs, so this window is what
    /// attributes a reply to its command.
    pub settle_interval: Duration,
    /// `None` leaves an absent device absent until the process restarts.
    pub reconnect: Option<ReconnectPolicy>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            settle_interval: DEFAULT_SETTLE,
            reconnect: Some(ReconnectPolicy::default()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 80,
        }
    }
}

/// Fully resolved process configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub serial: SerialConfig,
    pub bridge: BridgeConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Resolve from `std::env::args()` and the process environment.
    pub fn from_process() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::resolve(&args, &env)
    }

    /// Resolve from explicit arguments (without argv[0]) and environment.
    pub fn resolve(args: &[String], env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let flags = parse_flags(args)?;
        let lookup = |flag: &str, var: &str| -> Option<(String, String)> {
            flags
                .get(flag)
                .map(|v| (flag.to_string(), v.clone()))
                .or_else(|| env.get(var).map(|v| (var.to_string(), v.clone())))
        };

        let mut config = Config::default();

        if let Some((_, device)) = lookup("--device", ENV_DEVICE) {
            config.serial.device = device;
        }
        if let Some((key, value)) = lookup("--baud", ENV_BAUD) {
            config.serial.baud_rate = parse_number(&key, &value, "a baud rate")?;
        }
        if let Some((_, host)) = lookup("--host", ENV_HOST) {
            config.server.host = host;
        }
        if let Some((key, value)) = lookup("--port", ENV_PORT) {
            config.server.port = parse_number(&key, &value, "a TCP port")?;
        }
        if let Some((key, value)) = lookup("--settle-ms", ENV_SETTLE_MS) {
            let millis: u64 = parse_number(&key, &value, "milliseconds")?;
            config.bridge.settle_interval = Duration::from_millis(millis);
        }
        if let Some((key, value)) = lookup("--reconnect-ms", ENV_RECONNECT_MS) {
            let millis: u64 = parse_number(&key, &value, "milliseconds (0 disables)")?;
            config.bridge.reconnect = match millis {
                0 => None,
                ms => {
                    let initial = Duration::from_millis(ms);
                    Some(ReconnectPolicy {
                        initial,
                        max: DEFAULT_RECONNECT_MAX.max(initial),
                    })
                }
            };
        }

        Ok(config)
    }
}

const VALUE_FLAGS: &[&str] = &[
    "--device",
    "--baud",
    "--host",
    "--port",
    "--settle-ms",
    "--reconnect-ms",
];

fn parse_flags(args: &[String]) -> Result<HashMap<String, String>, ConfigError> {
    let mut flags = HashMap::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return Err(ConfigError::HelpRequested),
            flag if VALUE_FLAGS.contains(&flag) => {
                let value = iter.next().ok_or_else(|| ConfigError::MissingValue {
                    flag: flag.to_string(),
                })?;
                flags.insert(flag.to_string(), value.clone());
            }
            flag if flag.starts_with('-') => {
                return Err(ConfigError::UnknownFlag(flag.to_string()));
            }
            other => return Err(ConfigError::UnexpectedArgument(other.to_string())),
        }
    }
    Ok(flags)
}

fn parse_number<T: std::str::FromStr>(
    key: &str,
    value: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        expected,
    })
}

pub const USAGE: &str = "\
Usage: rigbridge [OPTIONS]

Options:
  --device <path>        Serial device of the motor controller [env: RIGBRIDGE_DEVICE] [default: /dev/clearCore]
  --baud <rate>          Serial baud rate [env: RIGBRIDGE_BAUD] [default: 9600]
  --host <addr>          Listen address [env: RIGBRIDGE_HOST] [default: 0.0.0.0]
  --port <port>          Listen port [env: RIGBRIDGE_PORT] [default: 80]
  --settle-ms <ms>       Wait after each command before reading the reply [env: RIGBRIDGE_SETTLE_MS] [default: 100]
  --reconnect-ms <ms>    Initial serial reopen backoff, 0 disables [env: RIGBRIDGE_RECONNECT_MS] [default: 2000]
  -h, --help             Print this help";
