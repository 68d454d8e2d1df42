//! infergate: admission, scheduling and accelerator gating for inference workloads.

mod health;
mod version;

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod gate;
pub mod lifecycle;
pub mod pool;
pub mod slot;
pub mod task;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, GateCapacity, QueuePolicy, SchedulerConfig};
pub use dispatcher::{Dispatcher, SubmitError, select_worker};
pub use engine::{
    ChatEngine, EngineError, Engines, SynthesisEngine, TranscriptionEngine, VisionEngine,
};
pub use gate::{Accelerator, GateError, GatePermit, Gates, ResourceGate};
pub use health::{GateStatus, ServiceState, StatusSnapshot, WorkerStatus};
pub use lifecycle::{LifecycleController, StartupError};
pub use pool::{PoolError, WorkerPool};
pub use slot::{ResultSlot, SlotError, SlotReceiver};
pub use task::{
    ChatMessage, ChatRequest, InvalidPayload, Outcome, Payload, SynthesisRequest, Task, TaskId,
    TaskKind, TaskOutput, Transcript, TranscriptionRequest, VisionRequest, VoiceParams,
};
pub use version::{INFERGATE_VERSION, VersionInfo};
pub use worker::{EnqueueError, Worker, WorkerContext, WorkerId, WorkerState};
