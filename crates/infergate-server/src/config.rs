//! Server configuration: TOML file, then `INFERGATE_*` environment overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use infergate::transport::{RouteDefaults, ServerConfig};
use infergate::{QueuePolicy, SchedulerConfig};
use serde::{Deserialize, Serialize};

/// Where the engine backends live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ollama server backing chat and vision.
    pub ollama_url: String,
    /// OpenAI-compatible server backing transcription and synthesis.
    pub audio_url: String,
    pub transcription_model: String,
    pub speech_model: String,
    pub api_key: Option<String>,
    /// Per-request HTTP timeout for engine calls.
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            audio_url: "http://localhost:8880".to_string(),
            transcription_model: "whisper-1".to_string(),
            speech_model: "tts-1".to_string(),
            api_key: None,
            timeout_secs: 300,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub routes: RouteDefaults,
    pub engines: EngineConfig,
}

impl AppConfig {
    /// Load configuration from file with environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse TOML config")
    }

    /// Apply `INFERGATE_*` overrides looked up through `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = var("INFERGATE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("INFERGATE_PORT") {
            self.server.port = port.parse().context("Invalid INFERGATE_PORT value")?;
        }
        if let Some(workers) = var("INFERGATE_WORKERS_PER_POOL") {
            self.scheduler.workers_per_pool = workers
                .parse()
                .context("Invalid INFERGATE_WORKERS_PER_POOL value")?;
        }
        if let Some(capacity) = var("INFERGATE_QUEUE_CAPACITY") {
            self.scheduler.queue_capacity_per_worker = capacity
                .parse()
                .context("Invalid INFERGATE_QUEUE_CAPACITY value")?;
        }
        if let Some(secs) = var("INFERGATE_REQUEST_TIMEOUT") {
            let secs: f64 = secs
                .parse()
                .context("Invalid INFERGATE_REQUEST_TIMEOUT value")?;
            self.scheduler.request_timeout = Duration::try_from_secs_f64(secs)
                .context("Invalid INFERGATE_REQUEST_TIMEOUT value")?;
        }
        if let Some(policy) = var("INFERGATE_QUEUE_POLICY") {
            self.scheduler.queue_policy = match policy.as_str() {
                "reject" => QueuePolicy::Reject,
                "block" => QueuePolicy::Block,
                other => anyhow::bail!("Invalid INFERGATE_QUEUE_POLICY value: {other}"),
            };
        }
        if let Some(url) = var("INFERGATE_OLLAMA_URL") {
            self.engines.ollama_url = url;
        }
        if let Some(url) = var("INFERGATE_AUDIO_URL") {
            self.engines.audio_url = url;
        }
        if let Some(key) = var("INFERGATE_API_KEY") {
            self.engines.api_key = Some(key).filter(|key| !key.is_empty());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler
            .validate()
            .context("Invalid [scheduler] section")?;

        if self.engines.ollama_url.is_empty() {
            anyhow::bail!("engines.ollama_url cannot be empty");
        }
        if self.engines.audio_url.is_empty() {
            anyhow::bail!("engines.audio_url cannot be empty");
        }
        if self.engines.timeout_secs == 0 {
            anyhow::bail!("engines.timeout_secs must be at least 1");
        }
        if self.routes.chat_model.is_empty() || self.routes.vision_model.is_empty() {
            anyhow::bail!("routes.chat_model and routes.vision_model cannot be empty");
        }
        if !(self.routes.speed > 0.0 && self.routes.speed <= 4.0) {
            anyhow::bail!("routes.speed must be in (0, 4] (got {})", self.routes.speed);
        }
        Ok(())
    }
}
