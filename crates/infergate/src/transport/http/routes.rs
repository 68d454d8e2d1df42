//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::dispatcher::SubmitError;
use crate::health::{ServiceState, StatusSnapshot};
use crate::lifecycle::LifecycleController;
use crate::task::{
    ChatMessage, ChatRequest, Outcome, Payload, SynthesisRequest, TaskOutput,
    TranscriptionRequest, VisionRequest, VoiceParams,
};
use crate::version::VersionInfo;

/// Request defaults applied by the HTTP layer before building payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteDefaults {
    pub chat_model: String,
    pub vision_model: String,
    pub voice: String,
    pub speed: f32,
    /// Prepended to every chat and vision prompt (e.g. a reply-language
    /// instruction).
    pub prompt_prefix: Option<String>,
    /// Browser origins allowed by CORS; `"*"` allows any.
    pub cors_origins: Vec<String>,
}

impl Default for RouteDefaults {
    fn default() -> Self {
        Self {
            chat_model: "gemma2:4b".to_string(),
            vision_model: "llava".to_string(),
            voice: "default".to_string(),
            speed: 1.0,
            prompt_prefix: None,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
        }
    }
}

impl RouteDefaults {
    fn prompt(&self, text: &str) -> String {
        match &self.prompt_prefix {
            Some(prefix) => format!("{prefix}{text}"),
            None => text.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleController>,
    pub defaults: Arc<RouteDefaults>,
}

impl AppState {
    pub fn new(lifecycle: Arc<LifecycleController>, defaults: RouteDefaults) -> Self {
        Self {
            lifecycle,
            defaults: Arc::new(defaults),
        }
    }
}

/// Errors surfaced to HTTP clients as `{detail, timestamp}`.
#[derive(Debug)]
enum ApiError {
    Submit(SubmitError),
    Failed(String),
    TimedOut,
    BadRequest(String),
    Invalid(String),
    UnexpectedOutput(&'static str),
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        Self::Submit(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
    timestamp: DateTime<Utc>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Submit(err) => {
                let status = match &err {
                    SubmitError::Backpressure { .. } => StatusCode::TOO_MANY_REQUESTS,
                    SubmitError::NotReady | SubmitError::ShuttingDown => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    SubmitError::InvalidPayload(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    SubmitError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
                };
                (status, err.to_string())
            }
            ApiError::Failed(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            ApiError::TimedOut => (
                StatusCode::REQUEST_TIMEOUT,
                "processing timed out".to_string(),
            ),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Invalid(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),
            ApiError::UnexpectedOutput(expected) => {
                tracing::error!(expected, "Bug: engine produced the wrong output type");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorBody {
            detail,
            timestamp: Utc::now(),
        });
        (status, body).into_response()
    }
}

async fn run(state: &AppState, payload: Payload) -> Result<TaskOutput, ApiError> {
    let timeout = state.lifecycle.config().request_timeout;
    match state.lifecycle.submit_task(payload, timeout).await? {
        Outcome::Success(output) => Ok(output),
        Outcome::Failure(message) => Err(ApiError::Failed(message)),
        Outcome::TimedOut => Err(ApiError::TimedOut),
    }
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    message: String,
    user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VisionBody {
    prompt: String,
    image_base64: String,
    user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpeechBody {
    text: String,
    voice: Option<String>,
    speed: Option<f32>,
    user_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct TextResponse {
    response: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct TranscriptResponse {
    text: String,
    duration: f64,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct AudioResponse {
    audio_base64: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: ServiceState,
    timestamp: DateTime<Utc>,
    version: VersionInfo,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    snapshot: StatusSnapshot,
    timestamp: DateTime<Utc>,
}

/// Decode base64 image data, tolerating a `data:image/...;base64,` prefix.
fn decode_image(encoded: &str) -> Result<Vec<u8>, ApiError> {
    let data = match encoded.split_once(',') {
        Some((_, data)) => data,
        None => encoded,
    };
    BASE64
        .decode(data.trim())
        .map_err(|e| ApiError::Invalid(format!("image_base64 is not valid base64: {e}")))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: state.lifecycle.state(),
        timestamp: Utc::now(),
        version: state.lifecycle.version().clone(),
    })
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        snapshot: state.lifecycle.status(),
        timestamp: Utc::now(),
    })
}

async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<TextResponse>, ApiError> {
    tracing::debug!(user = body.user_name.as_deref().unwrap_or("User"), "Chat request");
    let payload = Payload::Chat(ChatRequest {
        model: state.defaults.chat_model.clone(),
        messages: vec![ChatMessage::user(state.defaults.prompt(&body.message))],
    });

    match run(&state, payload).await? {
        TaskOutput::Text(response) => Ok(Json(TextResponse {
            response,
            timestamp: Utc::now(),
        })),
        _ => Err(ApiError::UnexpectedOutput("text")),
    }
}

async fn vision(
    State(state): State<AppState>,
    Json(body): Json<VisionBody>,
) -> Result<Json<TextResponse>, ApiError> {
    tracing::debug!(user = body.user_name.as_deref().unwrap_or("User"), "Vision request");
    let image = decode_image(&body.image_base64)?;
    let payload = Payload::VisionChat(VisionRequest {
        model: state.defaults.vision_model.clone(),
        prompt: state.defaults.prompt(&body.prompt),
        image,
    });

    match run(&state, payload).await? {
        TaskOutput::Text(response) => Ok(Json(TextResponse {
            response,
            timestamp: Utc::now(),
        })),
        _ => Err(ApiError::UnexpectedOutput("text")),
    }
}

/// Multipart upload; the `audio` field carries the clip and its file name.
async fn transcribe(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<TranscriptResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart payload: {e}")))?
    {
        if field.name() != Some("audio") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("audio.wav").to_string();
        let audio = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed reading 'audio' field: {e}")))?;
        upload = Some((audio, file_name));
    }

    let (audio, file_name) =
        upload.ok_or_else(|| ApiError::Invalid("missing 'audio' field".to_string()))?;
    let payload = Payload::Transcribe(TranscriptionRequest {
        audio: audio.to_vec(),
        file_name,
    });

    match run(&state, payload).await? {
        TaskOutput::Transcript(transcript) => Ok(Json(TranscriptResponse {
            text: transcript.text,
            duration: transcript.duration_secs,
            timestamp: Utc::now(),
        })),
        _ => Err(ApiError::UnexpectedOutput("transcript")),
    }
}

async fn synthesize(
    State(state): State<AppState>,
    Json(body): Json<SpeechBody>,
) -> Result<Json<AudioResponse>, ApiError> {
    tracing::debug!(user = body.user_name.as_deref().unwrap_or("User"), "Speech request");
    let payload = Payload::Synthesize(SynthesisRequest {
        text: body.text,
        voice: VoiceParams {
            voice: body.voice.unwrap_or_else(|| state.defaults.voice.clone()),
            speed: body.speed.unwrap_or(state.defaults.speed),
        },
    });

    match run(&state, payload).await? {
        TaskOutput::Audio(audio) => Ok(Json(AudioResponse {
            audio_base64: BASE64.encode(audio),
            timestamp: Utc::now(),
        })),
        _ => Err(ApiError::UnexpectedOutput("audio")),
    }
}

async fn shutdown(State(state): State<AppState>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    state.lifecycle.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

/// Audio and base64 images exceed axum's 2 MiB default.
const UPLOAD_LIMIT_BYTES: usize = 64 * 1024 * 1024;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let allowed = origins.iter().filter_map(|origin| match origin.parse::<HeaderValue>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(%origin, "Ignoring invalid CORS origin");
            None
        }
    });
    layer.allow_origin(AllowOrigin::list(allowed))
}

pub fn routes(state: AppState) -> Router {
    let cors = cors_layer(&state.defaults.cors_origins);
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/llm", post(chat))
        .route(
            "/api/vlm",
            post(vision).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route(
            "/api/whisper",
            post(transcribe).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route("/api/tts", post(synthesize))
        .route("/shutdown", post(shutdown))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::testing::{MockEngine, engines_from};
    use crate::worker::WorkerState;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn response_json(response: Response) -> serde_json::Value {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn ready_state(mock: &Arc<MockEngine>, config: SchedulerConfig) -> AppState {
        let lifecycle = LifecycleController::start(config, engines_from(mock))
            .await
            .unwrap();
        AppState::new(Arc::new(lifecycle), RouteDefaults::default())
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::options("/api/llm")
            .header("origin", origin)
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn cors_preflight_allows_configured_origin() {
        let mock = Arc::new(MockEngine::new());
        let app = routes(ready_state(&mock, SchedulerConfig::default()).await);

        let response = app
            .clone()
            .oneshot(preflight("http://localhost:5173"))
            .await
            .unwrap();

        assert!(response.status().is_success());
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "http://localhost:5173"
        );

        let response = app
            .oneshot(preflight("http://evil.example"))
            .await
            .unwrap();
        assert!(
            response
                .headers()
                .get("access-control-allow-origin")
                .is_none()
        );
    }

    #[tokio::test]
    async fn cors_wildcard_allows_any_origin() {
        let mock = Arc::new(MockEngine::new());
        let lifecycle = LifecycleController::start(SchedulerConfig::default(), engines_from(&mock))
            .await
            .unwrap();
        let defaults = RouteDefaults {
            cors_origins: vec!["*".to_string()],
            ..RouteDefaults::default()
        };
        let app = routes(AppState::new(Arc::new(lifecycle), defaults));

        let response = app
            .oneshot(preflight("http://anywhere.example"))
            .await
            .unwrap();

        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn health_reports_starting_before_initialize() {
        let mock = Arc::new(MockEngine::new());
        let lifecycle =
            LifecycleController::new(SchedulerConfig::default(), engines_from(&mock)).unwrap();
        let app = routes(AppState::new(Arc::new(lifecycle), RouteDefaults::default()));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["status"], "STARTING");
        assert!(json["version"]["infergate"].is_string());
    }

    #[tokio::test]
    async fn llm_returns_503_when_not_ready() {
        let mock = Arc::new(MockEngine::new());
        let lifecycle =
            LifecycleController::new(SchedulerConfig::default(), engines_from(&mock)).unwrap();
        let app = routes(AppState::new(Arc::new(lifecycle), RouteDefaults::default()));

        let response = app
            .oneshot(post_json("/api/llm", serde_json::json!({"message": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = response_json(response).await;
        assert_eq!(json["detail"], "service not ready");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn llm_success() {
        let mock = Arc::new(MockEngine::new());
        let app = routes(ready_state(&mock, SchedulerConfig::default()).await);

        let response = app
            .oneshot(post_json(
                "/api/llm",
                serde_json::json!({"message": "hello", "user_name": "Aisyah"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["response"], "echo: hello");
    }

    #[tokio::test]
    async fn prompt_prefix_is_applied() {
        let mock = Arc::new(MockEngine::new());
        let mut state = ready_state(&mock, SchedulerConfig::default()).await;
        state.defaults = Arc::new(RouteDefaults {
            prompt_prefix: Some("Answer briefly: ".to_string()),
            ..RouteDefaults::default()
        });

        let response = routes(state)
            .oneshot(post_json("/api/llm", serde_json::json!({"message": "why?"})))
            .await
            .unwrap();

        let json = response_json(response).await;
        assert_eq!(json["response"], "echo: Answer briefly: why?");
    }

    #[tokio::test]
    async fn blank_message_is_unprocessable() {
        let mock = Arc::new(MockEngine::new());
        let app = routes(ready_state(&mock, SchedulerConfig::default()).await);

        let response = app
            .oneshot(post_json("/api/llm", serde_json::json!({"message": "  "})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn engine_failure_is_500_with_detail() {
        let mock = Arc::new(MockEngine::new());
        mock.fail_next(1);
        let app = routes(ready_state(&mock, SchedulerConfig::default()).await);

        let response = app
            .oneshot(post_json("/api/llm", serde_json::json!({"message": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = response_json(response).await;
        assert_eq!(json["detail"], "engine request failed: mock failure");
    }

    #[tokio::test]
    async fn slow_engine_is_408() {
        let mock = Arc::new(MockEngine::new().with_delay(Duration::from_millis(500)));
        let config = SchedulerConfig::default().with_request_timeout(Duration::from_millis(50));
        let app = routes(ready_state(&mock, config).await);

        let response = app
            .oneshot(post_json("/api/llm", serde_json::json!({"message": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn full_queue_is_429() {
        let mock = Arc::new(MockEngine::new().with_delay(Duration::from_millis(300)));
        let config = SchedulerConfig::default()
            .with_queue_capacity(1)
            .with_request_timeout(Duration::from_secs(5));
        let state = ready_state(&mock, config).await;
        let lifecycle = Arc::clone(&state.lifecycle);
        let app = routes(state);

        // First request occupies the worker.
        let running = tokio::spawn(
            app.clone()
                .oneshot(post_json("/api/llm", serde_json::json!({"message": "1"}))),
        );
        while !lifecycle
            .status()
            .workers
            .iter()
            .any(|w| w.state == WorkerState::Processing)
        {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Second one fills the only queue slot.
        let queued = tokio::spawn(
            app.clone()
                .oneshot(post_json("/api/llm", serde_json::json!({"message": "2"}))),
        );
        while lifecycle.status().queued(crate::task::TaskKind::Chat) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let rejected = app
            .oneshot(post_json("/api/llm", serde_json::json!({"message": "3"})))
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);

        assert_eq!(running.await.unwrap().unwrap().status(), StatusCode::OK);
        assert_eq!(queued.await.unwrap().unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn vlm_accepts_data_url() {
        let mock = Arc::new(MockEngine::new());
        let app = routes(ready_state(&mock, SchedulerConfig::default()).await);

        let response = app
            .oneshot(post_json(
                "/api/vlm",
                serde_json::json!({
                    "prompt": "what is this?",
                    "image_base64": "data:image/png;base64,AQID"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["response"], "what is this? (3 bytes)");
    }

    #[tokio::test]
    async fn vlm_rejects_bad_base64() {
        let mock = Arc::new(MockEngine::new());
        let app = routes(ready_state(&mock, SchedulerConfig::default()).await);

        let response = app
            .oneshot(post_json(
                "/api/vlm",
                serde_json::json!({"prompt": "what?", "image_base64": "***"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    const BOUNDARY: &str = "infergate-test-boundary";

    fn multipart_request(field: &str, file_name: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; \
                 filename=\"{file_name}\"\r\nContent-Type: audio/wav\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::post("/api/whisper")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn whisper_transcribes_multipart_upload() {
        let mock = Arc::new(MockEngine::new());
        let app = routes(ready_state(&mock, SchedulerConfig::default()).await);

        let response = app
            .oneshot(multipart_request("audio", "clip.wav", &[0u8; 32_000]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["text"], "hello world");
        assert_eq!(json["duration"], 2.0);
    }

    #[tokio::test]
    async fn whisper_without_audio_field_is_422() {
        let mock = Arc::new(MockEngine::new());
        let app = routes(ready_state(&mock, SchedulerConfig::default()).await);

        let response = app
            .oneshot(multipart_request("file", "clip.wav", &[1, 2, 3]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = response_json(response).await;
        assert_eq!(json["detail"], "missing 'audio' field");
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn whisper_rejects_non_multipart_body() {
        let mock = Arc::new(MockEngine::new());
        let app = routes(ready_state(&mock, SchedulerConfig::default()).await);

        let response = app
            .oneshot(
                Request::post("/api/whisper")
                    .body(Body::from(vec![0u8; 64]))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn tts_returns_base64_audio() {
        let mock = Arc::new(MockEngine::new());
        let app = routes(ready_state(&mock, SchedulerConfig::default()).await);

        let response = app
            .oneshot(post_json(
                "/api/tts",
                serde_json::json!({"text": "hi there", "speed": 1.2}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        let audio = BASE64
            .decode(json["audio_base64"].as_str().unwrap())
            .unwrap();
        assert_eq!(audio, b"hi there");
    }

    #[tokio::test]
    async fn status_lists_workers_and_gates() {
        let mock = Arc::new(MockEngine::new());
        let app = routes(ready_state(&mock, SchedulerConfig::default()).await);

        let response = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let json = response_json(response).await;
        assert_eq!(json["state"], "READY");
        assert_eq!(json["workers"].as_array().unwrap().len(), 4);
        assert_eq!(json["workers"][0]["id"], "chat-0");
        assert_eq!(json["gates"][1]["accelerator"], "secondary");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn shutdown_endpoint_closes_admission() {
        let mock = Arc::new(MockEngine::new());
        let state = ready_state(&mock, SchedulerConfig::default()).await;
        let lifecycle = Arc::clone(&state.lifecycle);
        let app = routes(state);

        let response = app
            .clone()
            .oneshot(Request::post("/shutdown").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(lifecycle.is_shutdown_requested());

        let late = app
            .oneshot(post_json("/api/llm", serde_json::json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(late.status(), StatusCode::SERVICE_UNAVAILABLE);

        lifecycle.shutdown().await;
    }
}
