use std::process;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use rigbridge::config::USAGE;
use rigbridge::transport::serve;
use rigbridge::{Bridge, Config, ConfigError, ControlService, SerialLink, VersionInfo};

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("RIGBRIDGE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "rigbridge={level},rigbridge_server={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn main() {
    let config = match Config::from_process() {
        Ok(config) => config,
        Err(ConfigError::HelpRequested) => {
            println!("{USAGE}");
            return;
        }
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!();
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(config) {
        tracing::error!(error = %e, "rigbridge exited with error");
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

#[tokio::main]
async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        device = %config.serial.device,
        baud_rate = config.serial.baud_rate,
        settle_ms = config.bridge.settle_interval.as_millis() as u64,
        "Starting rigbridge"
    );

    let link = SerialLink::open(&config.serial);
    let bridge = Bridge::new(link, config.bridge.clone());
    let version = VersionInfo::new()
        .with_serial(&config.serial)
        .with_settle(config.bridge.settle_interval);
    let service = Arc::new(ControlService::new(bridge).with_version(version));

    serve(config.server, service).await
}
