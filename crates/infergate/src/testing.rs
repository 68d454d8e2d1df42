//! Test doubles shared by unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::engine::{
    ChatEngine, EngineError, Engines, SynthesisEngine, TranscriptionEngine, VisionEngine,
};
use crate::task::{ChatMessage, ChatRequest, Payload, Transcript, VoiceParams};

/// Engine that serves every workload kind with canned results.
#[derive(Default)]
pub struct MockEngine {
    delay: Duration,
    init_delay: Duration,
    init_error: Option<String>,
    fail_next: AtomicUsize,
    panic_next: AtomicUsize,
    init_calls: AtomicUsize,
    init_done: AtomicUsize,
    calls: AtomicUsize,
    release_calls: AtomicUsize,
    /// Releases that happened while some initialize call was still running.
    early_releases: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn with_failing_init(mut self, message: &str) -> Self {
        self.init_error = Some(message.to_string());
        self
    }

    /// The next `n` inference calls return an error.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// The next `n` inference calls panic.
    pub fn panic_next(&self, n: usize) {
        self.panic_next.store(n, Ordering::SeqCst);
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn early_releases(&self) -> usize {
        self.early_releases.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn run(&self) -> Result<(), EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if Self::take(&self.panic_next) {
            panic!("mock engine panicked");
        }
        if Self::take(&self.fail_next) {
            return Err(EngineError::request("mock failure"));
        }
        Ok(())
    }

    async fn init(&self) -> Result<(), EngineError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        self.init_done.fetch_add(1, Ordering::SeqCst);
        match &self.init_error {
            Some(message) => Err(EngineError::unavailable(message.clone())),
            None => Ok(()),
        }
    }

    fn release_once(&self) {
        if self.init_done.load(Ordering::SeqCst) < self.init_calls.load(Ordering::SeqCst) {
            self.early_releases.fetch_add(1, Ordering::SeqCst);
        }
        self.release_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ChatEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        self.init().await
    }

    async fn chat(&self, _model: &str, messages: &[ChatMessage]) -> Result<String, EngineError> {
        self.run().await?;
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        Ok(format!("echo: {last}"))
    }

    async fn release(&self) {
        self.release_once();
    }
}

#[async_trait::async_trait]
impl VisionEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        self.init().await
    }

    async fn describe(
        &self,
        _model: &str,
        prompt: &str,
        image: &[u8],
    ) -> Result<String, EngineError> {
        self.run().await?;
        Ok(format!("{prompt} ({} bytes)", image.len()))
    }

    async fn release(&self) {
        self.release_once();
    }
}

#[async_trait::async_trait]
impl TranscriptionEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        self.init().await
    }

    async fn transcribe(&self, audio: &[u8], _file_name: &str) -> Result<Transcript, EngineError> {
        self.run().await?;
        Ok(Transcript {
            text: "hello world".to_string(),
            duration_secs: audio.len() as f64 / 16_000.0,
        })
    }

    async fn release(&self) {
        self.release_once();
    }
}

#[async_trait::async_trait]
impl SynthesisEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        self.init().await
    }

    async fn synthesize(&self, text: &str, _voice: &VoiceParams) -> Result<Vec<u8>, EngineError> {
        self.run().await?;
        Ok(text.as_bytes().to_vec())
    }

    async fn release(&self) {
        self.release_once();
    }
}

/// Route every workload kind to the same mock.
pub fn engines_from(mock: &Arc<MockEngine>) -> Engines {
    Engines {
        chat: mock.clone(),
        vision: mock.clone(),
        transcription: mock.clone(),
        synthesis: mock.clone(),
    }
}

pub fn chat_payload(content: &str) -> Payload {
    Payload::Chat(ChatRequest {
        model: "gemma2:4b".to_string(),
        messages: vec![ChatMessage::user(content)],
    })
}
