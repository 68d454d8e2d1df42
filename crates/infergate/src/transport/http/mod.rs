//! HTTP transport: axum routes plus the server loop with graceful shutdown.

mod routes;
mod server;

pub use routes::{AppState, RouteDefaults, routes};
pub use server::{ServerConfig, serve, serve_on};
