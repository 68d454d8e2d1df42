//! Inference engine interfaces.
//!
//! The scheduling core only talks to engines through these traits. Concrete
//! HTTP clients live in [`ollama`] and [`openai_audio`]; tests plug in mocks.

pub mod ollama;
pub mod openai_audio;

use std::sync::Arc;

use crate::task::{ChatMessage, TaskKind, Transcript, VoiceParams};

pub use ollama::OllamaEngine;
pub use openai_audio::OpenAiAudioEngine;

/// Errors reported by an engine. Surfaced to callers verbatim as
/// `Outcome::Failure`; the core never retries.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The backend could not be reached or refused the model.
    #[error("engine unavailable: {message}")]
    Unavailable { message: String },

    /// The backend answered the request with an error.
    #[error("engine request failed: {message}")]
    Request { message: String },

    /// The backend answered with something we could not interpret.
    #[error("invalid engine response: {message}")]
    InvalidResponse { message: String },

    /// Engine-internal failure (panics are reported here too).
    #[error("engine error: {message}")]
    Other { message: String },
}

impl EngineError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::unavailable(err.to_string())
        } else if err.is_decode() {
            Self::invalid_response(err.to_string())
        } else {
            Self::request(err.to_string())
        }
    }
}

/// Text chat over a conversation.
#[async_trait::async_trait]
pub trait ChatEngine: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Load or warm the model. Called once at startup.
    async fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String, EngineError>;

    /// Free backend resources. Called once at shutdown.
    async fn release(&self) {}
}

/// Image-grounded chat.
#[async_trait::async_trait]
pub trait VisionEngine: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn describe(&self, model: &str, prompt: &str, image: &[u8])
    -> Result<String, EngineError>;

    async fn release(&self) {}
}

/// Speech to text.
#[async_trait::async_trait]
pub trait TranscriptionEngine: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn transcribe(&self, audio: &[u8], file_name: &str) -> Result<Transcript, EngineError>;

    async fn release(&self) {}
}

/// Text to speech. Returns encoded audio.
#[async_trait::async_trait]
pub trait SynthesisEngine: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>, EngineError>;

    async fn release(&self) {}
}

/// One engine per workload kind. The same backend may serve several kinds.
#[derive(Clone)]
pub struct Engines {
    pub chat: Arc<dyn ChatEngine>,
    pub vision: Arc<dyn VisionEngine>,
    pub transcription: Arc<dyn TranscriptionEngine>,
    pub synthesis: Arc<dyn SynthesisEngine>,
}

impl Engines {
    pub fn name_for(&self, kind: TaskKind) -> &str {
        match kind {
            TaskKind::Chat => self.chat.name(),
            TaskKind::VisionChat => self.vision.name(),
            TaskKind::Transcribe => self.transcription.name(),
            TaskKind::Synthesize => self.synthesis.name(),
        }
    }

    /// Initialize every engine concurrently. The first failure (in kind
    /// order) is returned; the others still run to completion.
    pub async fn initialize(&self) -> Result<(), (TaskKind, EngineError)> {
        let (chat, vision, transcription, synthesis) = tokio::join!(
            self.chat.initialize(),
            self.vision.initialize(),
            self.transcription.initialize(),
            self.synthesis.initialize(),
        );

        let results = [
            (TaskKind::Chat, chat),
            (TaskKind::VisionChat, vision),
            (TaskKind::Transcribe, transcription),
            (TaskKind::Synthesize, synthesis),
        ];
        for (kind, result) in results {
            match result {
                Ok(()) => {
                    tracing::info!(
                        kind = %kind,
                        engine = self.name_for(kind),
                        "Engine initialized"
                    );
                }
                Err(err) => return Err((kind, err)),
            }
        }
        Ok(())
    }

    pub async fn release(&self) {
        tokio::join!(
            self.chat.release(),
            self.vision.release(),
            self.transcription.release(),
            self.synthesis.release(),
        );
        tracing::debug!("Engines released");
    }
}

impl std::fmt::Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines")
            .field("chat", &self.chat.name())
            .field("vision", &self.vision.name())
            .field("transcription", &self.transcription.name())
            .field("synthesis", &self.synthesis.name())
            .finish()
    }
}
