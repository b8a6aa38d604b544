//! axum HTTP transport: WebSocket control sessions plus operational endpoints.

mod routes;
mod server;

pub use routes::{HealthCheckResponse, routes};
pub use server::{serve, serve_on};
