//! Speech engines speaking the OpenAI audio API
//! (`/v1/audio/transcriptions`, `/v1/audio/speech`).
//!
//! Works against any compatible server (faster-whisper-server, Kokoro, ...).

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use super::{EngineError, SynthesisEngine, TranscriptionEngine};
use crate::task::{Transcript, VoiceParams};

#[derive(Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

pub struct OpenAiAudioEngine {
    http: reqwest::Client,
    base_url: String,
    transcription_model: String,
    speech_model: String,
    api_key: Option<String>,
}

impl OpenAiAudioEngine {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transcription_model: "whisper-1".to_string(),
            speech_model: "tts-1".to_string(),
            api_key: None,
        })
    }

    pub fn with_transcription_model(mut self, model: impl Into<String>) -> Self {
        self.transcription_model = model.into();
        self
    }

    pub fn with_speech_model(mut self, model: impl Into<String>) -> Self {
        self.speech_model = model.into();
        self
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.http.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Confirm the server is up before taking traffic.
    async fn probe(&self) -> Result<(), EngineError> {
        let mut request = self.http.get(format!("{}/v1/models", self.base_url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("{}: {e}", self.base_url)))?;
        if !response.status().is_success() {
            return Err(EngineError::unavailable(format!(
                "{} answered model listing with {}",
                self.base_url,
                response.status()
            )));
        }
        Ok(())
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(EngineError::request(format!("{status}: {}", body.trim())))
}

#[async_trait::async_trait]
impl TranscriptionEngine for OpenAiAudioEngine {
    fn name(&self) -> &str {
        "openai-audio"
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        self.probe().await
    }

    async fn transcribe(&self, audio: &[u8], file_name: &str) -> Result<Transcript, EngineError> {
        let form = Form::new()
            .part(
                "file",
                Part::bytes(audio.to_vec()).file_name(file_name.to_string()),
            )
            .text("model", self.transcription_model.clone())
            .text("response_format", "verbose_json");

        let response = self
            .post("/v1/audio/transcriptions")
            .multipart(form)
            .send()
            .await?;
        let reply: VerboseTranscription = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| EngineError::invalid_response(e.to_string()))?;

        Ok(Transcript {
            text: reply.text.trim().to_string(),
            duration_secs: reply.duration.unwrap_or(0.0),
        })
    }
}

// Both directions usually live on the same server; the transcription side
// does the startup probe.
#[async_trait::async_trait]
impl SynthesisEngine for OpenAiAudioEngine {
    fn name(&self) -> &str {
        "openai-audio"
    }

    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>, EngineError> {
        let response = self
            .post("/v1/audio/speech")
            .json(&SpeechBody {
                model: &self.speech_model,
                input: text,
                voice: &voice.voice,
                speed: voice.speed,
                response_format: "wav",
            })
            .send()
            .await?;
        let audio = error_for_status(response).await?.bytes().await?;
        if audio.is_empty() {
            return Err(EngineError::invalid_response("empty audio"));
        }
        Ok(audio.to_vec())
    }
}
