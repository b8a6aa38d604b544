//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::health::{Health, LinkHealth};
use crate::service::{ControlService, HealthSnapshot};
use crate::session::ControlSession;
use crate::version::VersionInfo;

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: Health,
    pub link: LinkHealth,
    pub active_sessions: usize,
    pub exchanges: u64,
    pub version: VersionInfo,
}

impl From<HealthSnapshot> for HealthCheckResponse {
    fn from(snapshot: HealthSnapshot) -> Self {
        Self {
            status: snapshot.state,
            link: snapshot.link,
            active_sessions: snapshot.active_sessions,
            exchanges: snapshot.exchanges,
            version: snapshot.version,
        }
    }
}

async fn health_check(State(service): State<Arc<ControlService>>) -> Json<HealthCheckResponse> {
    Json(service.health().into())
}

async fn shutdown(State(service): State<Arc<ControlService>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

async fn control_socket(
    State(service): State<Arc<ControlService>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let session = service.open_session();
        run_session(socket, session).await;
    })
}

/// Drive one WebSocket connection: every inbound text frame yields exactly one
/// outbound text frame, and the session is closed however the loop ends.
async fn run_session(mut socket: WebSocket, mut session: ControlSession) {
    let id = session.id();

    while let Some(received) = socket.recv().await {
        let frame = match received {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                debug!(session = %id, "Peer closed the socket");
                break;
            }
            Err(e) => {
                warn!(session = %id, error = %e, "WebSocket receive failed");
                break;
            }
        };

        let Some(report) = session.on_frame(&frame).await else {
            break;
        };

        if let Err(e) = socket.send(Message::Text(report.to_string().into())).await {
            warn!(session = %id, error = %e, "WebSocket send failed");
            break;
        }
    }

    session.close().await;
}

pub fn routes(service: Arc<ControlService>) -> Router {
    Router::new()
        .route("/ws", get(control_socket))
        .route("/health-check", get(health_check))
        .route("/shutdown", post(shutdown))
        .with_state(service)
}
