//! Transport layer for rigbridge.
//!
//! Sessions are carried over WebSocket, served by axum alongside the health
//! and shutdown endpoints.

pub mod http;

pub use http::{serve, serve_on};
