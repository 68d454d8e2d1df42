//! infergate server - main entry point

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use infergate::engine::{OllamaEngine, OpenAiAudioEngine};
use infergate::transport::AppState;
use infergate::transport::http::serve_on;
use infergate::{Engines, LifecycleController, VersionInfo};
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppConfig, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "infergate")]
#[command(about = "Inference scheduling server for chat, vision and speech", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "INFERGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override bind host
    #[arg(long)]
    host: Option<String>,

    /// Override bind port
    #[arg(long)]
    port: Option<u16>,

    /// Ignore SIGTERM; stop only on SIGINT or POST /shutdown
    #[arg(long)]
    await_explicit_shutdown: bool,
}

/// Initialize tracing with INFERGATE_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("INFERGATE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("infergate={level},infergate_server={level}"))
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

fn build_engines(engines: &EngineConfig, models: [String; 2]) -> Result<Engines> {
    let ollama = Arc::new(
        OllamaEngine::new(&engines.ollama_url, engines.timeout())
            .context("Failed to build Ollama client")?
            .with_models(models),
    );
    let audio = Arc::new(
        OpenAiAudioEngine::new(&engines.audio_url, engines.timeout())
            .context("Failed to build audio client")?
            .with_transcription_model(&engines.transcription_model)
            .with_speech_model(&engines.speech_model)
            .with_api_key(engines.api_key.clone()),
    );

    Ok(Engines {
        chat: ollama.clone(),
        vision: ollama,
        transcription: audio.clone(),
        synthesis: audio,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.await_explicit_shutdown {
        config.server.await_explicit_shutdown = true;
    }
    config.validate()?;

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        workers_per_pool = config.scheduler.workers_per_pool,
        queue_capacity = config.scheduler.queue_capacity_per_worker,
        policy = ?config.scheduler.queue_policy,
        ollama = %config.engines.ollama_url,
        audio = %config.engines.audio_url,
        "Configuration loaded"
    );

    let engines = build_engines(
        &config.engines,
        [
            config.routes.chat_model.clone(),
            config.routes.vision_model.clone(),
        ],
    )?;

    let lifecycle = Arc::new(
        LifecycleController::new(config.scheduler.clone(), engines)?
            .with_version(VersionInfo::new().with_server(env!("CARGO_PKG_VERSION"))),
    );

    // Serve before engines are up so /health reports STARTING.
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let state = AppState::new(Arc::clone(&lifecycle), config.routes.clone());
    let server = tokio::spawn(serve_on(
        listener,
        config.server.await_explicit_shutdown,
        state,
    ));

    if let Err(e) = lifecycle.initialize().await {
        if lifecycle.is_shutdown_requested() {
            tracing::info!("Stopped before startup completed");
            server.await.context("Server task panicked")??;
            return Ok(());
        }
        tracing::error!(error = %e, "Startup failed");
        lifecycle.trigger_shutdown();
        if let Err(join) = server.await {
            tracing::error!(error = %join, "Server task failed");
        }
        return Err(e.into());
    }

    server.await.context("Server task panicked")??;

    tracing::info!("Shutdown complete");
    Ok(())
}
