//! Transport layer for infergate.
//!
//! Currently provides HTTP transport via axum. Every transport drives the
//! core through `LifecycleController::submit_task`.

pub mod http;

pub use http::{AppState, RouteDefaults, ServerConfig, routes, serve};
