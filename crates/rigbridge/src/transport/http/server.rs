//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::config::ServerConfig;
use crate::service::ControlService;

use super::routes::routes;

/// Bind the configured address and serve until shutdown.
pub async fn serve(config: ServerConfig, service: Arc<ControlService>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, service).await
}

/// Serve on an already bound listener.
///
/// Stops accepting on SIGINT, SIGTERM or `POST /shutdown`. Open sessions are
/// closed by axum's graceful shutdown, each issuing its own power-off; a final
/// power-off follows so the rig is de-energized even when no session was open.
pub async fn serve_on(listener: TcpListener, service: Arc<ControlService>) -> anyhow::Result<()> {
    let shutdown_rx = service.shutdown_rx();
    let app = routes(service.clone());

    let actual_addr = listener.local_addr()?;
    info!("Starting rigbridge server on {}", actual_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_rx))
        .await?;

    info!("Server shutdown complete");
    service.shutdown().await;

    Ok(())
}

/// Resolves once `POST /shutdown` flips the service flag. If the service is
/// gone without ever requesting shutdown, only a process signal can stop us.
async fn shutdown_requested(mut shutdown_rx: watch::Receiver<bool>) {
    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// # Panics
///
/// Panics if signal handlers cannot be installed, which only happens when the
/// tokio runtime is misconfigured at startup.
async fn shutdown_signal(shutdown_rx: watch::Receiver<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler - is tokio runtime configured correctly?")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, powering rig off and stopping"),
        _ = terminate => info!("Received SIGTERM, powering rig off and stopping"),
        _ = shutdown_requested(shutdown_rx) => {
            info!("Shutdown requested over HTTP, powering rig off and stopping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::bridge::Bridge;
    use crate::config::BridgeConfig;
    use crate::serial::fake::FakeController;

    #[tokio::test]
    async fn serve_rejects_unparseable_host() {
        let (link, _controller) = FakeController::silent();
        let service = Arc::new(ControlService::new(Bridge::new(
            link,
            BridgeConfig::default(),
        )));
        let config = ServerConfig {
            host: "not a host".to_string(),
            port: 80,
        };

        assert!(serve(config, service).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_requested_waits_for_flag() {
        let (tx, rx) = watch::channel(false);
        let mut waiter = tokio::spawn(shutdown_requested(rx));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!waiter.is_finished());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), &mut waiter)
            .await
            .expect("flag not observed")
            .unwrap();
    }

    #[tokio::test]
    async fn explicit_shutdown_stops_server_and_powers_off() {
        let (link, controller) = FakeController::silent();
        let service = Arc::new(ControlService::new(Bridge::new(
            link,
            BridgeConfig {
                settle_interval: Duration::from_millis(10),
                reconnect: None,
            },
        )));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let server = tokio::spawn(serve_on(listener, Arc::clone(&service)));
        service.trigger_shutdown();

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();

        assert_eq!(controller.received(), vec!["off_h"]);
    }
}
