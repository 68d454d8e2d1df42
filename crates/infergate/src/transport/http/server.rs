//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::lifecycle::LifecycleController;

use super::routes::{AppState, routes};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// If true, ignore SIGTERM and wait for explicit /shutdown or SIGINT.
    /// Used in Kubernetes to allow graceful draining.
    pub await_explicit_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            await_explicit_shutdown: false,
        }
    }
}

/// Bind `config.host:config.port` and serve until shutdown.
pub async fn serve(config: ServerConfig, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, config.await_explicit_shutdown, state).await
}

/// Serve on an already-bound listener.
///
/// On SIGINT, SIGTERM or `/shutdown` the dispatcher stops admitting work,
/// in-flight requests finish, then the lifecycle shuts down.
pub async fn serve_on(
    listener: TcpListener,
    await_explicit_shutdown: bool,
    state: AppState,
) -> anyhow::Result<()> {
    let lifecycle = Arc::clone(&state.lifecycle);
    let app = routes(state);

    info!("Starting infergate server on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            await_explicit_shutdown,
            Arc::clone(&lifecycle),
        ))
        .await?;

    info!("Server shutdown complete");

    lifecycle.shutdown().await;

    Ok(())
}

/// Wait for shutdown signal (SIGTERM, SIGINT, or /shutdown endpoint), then
/// close admission.
async fn shutdown_signal(await_explicit_shutdown: bool, lifecycle: Arc<LifecycleController>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        if await_explicit_shutdown {
            // Ignore SIGTERM - wait forever (until SIGINT or explicit shutdown)
            tracing::info!("await_explicit_shutdown enabled, ignoring SIGTERM");
            std::future::pending::<()>().await
        } else {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await
                }
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let explicit_shutdown = wait_cancelled(lifecycle.shutdown_token());

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = explicit_shutdown => {
            info!("Shutdown requested via /shutdown endpoint...");
        }
    }

    lifecycle.trigger_shutdown();
}

async fn wait_cancelled(token: CancellationToken) {
    token.cancelled().await
}
