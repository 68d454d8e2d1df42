//! Ollama-backed chat and vision engine.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{ChatEngine, EngineError, VisionEngine};
use crate::task::ChatMessage;

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Deserialize)]
struct ChatReply {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: String,
}

#[derive(Serialize)]
struct PullBody<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct PullReply {
    status: String,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: String,
}

/// Client for an Ollama server (`/api/chat`, `/api/pull`).
pub struct OllamaEngine {
    http: reqwest::Client,
    base_url: String,
    models: Vec<String>,
}

impl OllamaEngine {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            models: Vec::new(),
        })
    }

    /// Models pulled during `initialize`.
    pub fn with_models(mut self, models: impl IntoIterator<Item = String>) -> Self {
        self.models = models.into_iter().collect();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn pull(&self, model: &str) -> Result<(), EngineError> {
        tracing::info!(model, "Pulling model");
        let response = self
            .http
            .post(self.url("/api/pull"))
            .json(&PullBody {
                model,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("pull {model}: {e}")))?;

        let reply: PullReply = decode(response).await?;
        if reply.status != "success" {
            return Err(EngineError::unavailable(format!(
                "pull {model} ended with status {:?}",
                reply.status
            )));
        }
        Ok(())
    }

    async fn send_chat(&self, body: &ChatBody<'_>) -> Result<String, EngineError> {
        let response = self.http.post(self.url("/api/chat")).json(body).send().await?;
        let reply: ChatReply = decode(response).await?;
        Ok(reply.message.content)
    }

    async fn pull_all(&self) -> Result<(), EngineError> {
        for model in &self.models {
            self.pull(model).await?;
        }
        Ok(())
    }
}

/// Turn an Ollama response into `T`, surfacing `{"error": ...}` bodies.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, EngineError> {
    let status = response.status();
    let bytes = response.bytes().await?;

    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorReply>(&bytes)
            .map(|e| e.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
        return Err(EngineError::request(format!("{status}: {message}")));
    }

    serde_json::from_slice(&bytes).map_err(|e| EngineError::invalid_response(e.to_string()))
}

#[async_trait::async_trait]
impl ChatEngine for OllamaEngine {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        self.pull_all().await
    }

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String, EngineError> {
        let body = ChatBody {
            model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: &m.role,
                    content: &m.content,
                    images: Vec::new(),
                })
                .collect(),
            stream: false,
        };
        self.send_chat(&body).await
    }
}

// Chat and vision share one Ollama server; models are pulled once, from the
// chat side.
#[async_trait::async_trait]
impl VisionEngine for OllamaEngine {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn describe(
        &self,
        model: &str,
        prompt: &str,
        image: &[u8],
    ) -> Result<String, EngineError> {
        let body = ChatBody {
            model,
            messages: vec![WireMessage {
                role: "user",
                content: prompt,
                images: vec![BASE64.encode(image)],
            }],
            stream: false,
        };
        self.send_chat(&body).await
    }
}
