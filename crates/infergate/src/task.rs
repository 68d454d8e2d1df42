//! Tasks, payloads and outcomes.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::engine::{EngineError, Engines};
use crate::gate::Accelerator;
use crate::slot::{ResultSlot, SlotReceiver};

/// Unique identifier for a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(uuid::Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workload kind. Each kind has its own worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Chat,
    VisionChat,
    Transcribe,
    Synthesize,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Chat,
        TaskKind::VisionChat,
        TaskKind::Transcribe,
        TaskKind::Synthesize,
    ];

    /// The accelerator this workload runs on.
    pub fn accelerator(&self) -> Accelerator {
        match self {
            Self::Chat | Self::VisionChat => Accelerator::Primary,
            Self::Transcribe | Self::Synthesize => Accelerator::Secondary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::VisionChat => "vision_chat",
            Self::Transcribe => "transcribe",
            Self::Synthesize => "synthesize",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub model: String,
    pub prompt: String,
    pub image: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub audio: Vec<u8>,
    /// Name handed to the engine so it can sniff the container format.
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    pub voice: String,
    pub speed: f32,
}

#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: VoiceParams,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {kind} payload: {reason}")]
pub struct InvalidPayload {
    pub kind: TaskKind,
    pub reason: String,
}

/// Work to run, one variant per workload kind.
#[derive(Debug, Clone)]
pub enum Payload {
    Chat(ChatRequest),
    VisionChat(VisionRequest),
    Transcribe(TranscriptionRequest),
    Synthesize(SynthesisRequest),
}

impl Payload {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Chat(_) => TaskKind::Chat,
            Self::VisionChat(_) => TaskKind::VisionChat,
            Self::Transcribe(_) => TaskKind::Transcribe,
            Self::Synthesize(_) => TaskKind::Synthesize,
        }
    }

    /// Reject payloads no engine could do anything useful with.
    pub fn validate(&self) -> Result<(), InvalidPayload> {
        let invalid = |reason: &str| {
            Err(InvalidPayload {
                kind: self.kind(),
                reason: reason.to_string(),
            })
        };

        match self {
            Self::Chat(req) => {
                if req.model.trim().is_empty() {
                    return invalid("model is empty");
                }
                if req.messages.is_empty() {
                    return invalid("conversation is empty");
                }
                if req.messages.iter().all(|m| m.content.trim().is_empty()) {
                    return invalid("all messages are blank");
                }
            }
            Self::VisionChat(req) => {
                if req.model.trim().is_empty() {
                    return invalid("model is empty");
                }
                if req.prompt.trim().is_empty() {
                    return invalid("prompt is empty");
                }
                if req.image.is_empty() {
                    return invalid("image is empty");
                }
            }
            Self::Transcribe(req) => {
                if req.audio.is_empty() {
                    return invalid("audio is empty");
                }
            }
            Self::Synthesize(req) => {
                if req.text.trim().is_empty() {
                    return invalid("text is empty");
                }
                if req.voice.voice.trim().is_empty() {
                    return invalid("voice is empty");
                }
                if !(req.voice.speed > 0.0 && req.voice.speed <= 4.0) {
                    return invalid("speed must be in (0, 4]");
                }
            }
        }
        Ok(())
    }

    /// Call the engine for this payload. Must run inside the accelerator's gate.
    pub(crate) async fn invoke(&self, engines: &Engines) -> Result<TaskOutput, EngineError> {
        match self {
            Self::Chat(req) => engines
                .chat
                .chat(&req.model, &req.messages)
                .await
                .map(TaskOutput::Text),
            Self::VisionChat(req) => engines
                .vision
                .describe(&req.model, &req.prompt, &req.image)
                .await
                .map(TaskOutput::Text),
            Self::Transcribe(req) => engines
                .transcription
                .transcribe(&req.audio, &req.file_name)
                .await
                .map(TaskOutput::Transcript),
            Self::Synthesize(req) => engines
                .synthesis
                .synthesize(&req.text, &req.voice)
                .await
                .map(TaskOutput::Audio),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub duration_secs: f64,
}

/// What a successful task produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    Text(String),
    Transcript(Transcript),
    Audio(Vec<u8>),
}

/// Final result of a task, as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(TaskOutput),
    /// The engine (or the scheduler on its behalf) reported an error.
    Failure(String),
    /// No outcome arrived before the caller's deadline.
    TimedOut,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure(_) => "failure",
            Self::TimedOut => "timed_out",
        }
    }
}

/// A unit of work travelling from the dispatcher to a worker.
///
/// Owned by the worker queue it sits in, then by the worker processing it.
pub struct Task {
    id: TaskId,
    payload: Payload,
    submitted_at: Instant,
    slot: ResultSlot,
}

impl Task {
    /// Create a task and the receiver its caller waits on.
    pub fn new(payload: Payload) -> (Self, SlotReceiver) {
        let id = TaskId::new();
        let (slot, receiver) = ResultSlot::new(id);
        (
            Self {
                id,
                payload,
                submitted_at: Instant::now(),
                slot,
            },
            receiver,
        )
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn slot(&self) -> &ResultSlot {
        &self.slot
    }

    /// Time since submission.
    pub fn age(&self) -> Duration {
        self.submitted_at.elapsed()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("age", &self.age())
            .finish()
    }
}
