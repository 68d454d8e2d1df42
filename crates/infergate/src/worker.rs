//! Worker - a long-lived task draining one bounded FIFO queue.
//!
//! Each worker processes at most one task at a time:
//! - receive a task (or the stop marker)
//! - run the engine call inside the accelerator's gate, catching panics
//! - resolve the task's result slot
//!
//! An engine error or panic becomes the task's `Outcome::Failure`; the loop
//! keeps going.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::engine::Engines;
use crate::gate::Gates;
use crate::task::{Outcome, Task, TaskKind};

pub(crate) const STOPPING_MESSAGE: &str = "service stopping";

/// Position of a worker inside its pool, e.g. `chat-0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId {
    pub kind: TaskKind,
    pub index: usize,
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.kind, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Processing,
    Stopped,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Processing,
            _ => Self::Stopped,
        }
    }

    fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Processing)
                | (Self::Processing, Self::Idle)
                | (Self::Idle, Self::Stopped)
        )
    }
}

/// Lock-free worker state, readable from status probes.
#[derive(Debug)]
pub(crate) struct StateCell {
    id: WorkerId,
    state: AtomicU8,
}

impl StateCell {
    fn new(id: WorkerId) -> Self {
        Self {
            id,
            state: AtomicU8::new(WorkerState::Idle as u8),
        }
    }

    pub(crate) fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next`. Illegal transitions are refused and logged.
    pub(crate) fn transition(&self, next: WorkerState) -> bool {
        let current = self.get();
        if !current.can_transition_to(next) {
            tracing::error!(
                worker = %self.id,
                from = ?current,
                to = ?next,
                "Bug: illegal worker state transition"
            );
            return false;
        }
        self.state
            .compare_exchange(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

pub(crate) enum WorkerMessage {
    Run(Task),
    Stop,
}

/// Why a task could not be placed in a worker queue. The task is handed back.
#[derive(Debug)]
pub enum EnqueueError {
    /// Queue holds `capacity` tasks (or stayed full until the deadline).
    Full(Task),
    /// Worker loop has exited.
    Closed(Task),
}

impl EnqueueError {
    pub fn into_task(self) -> Task {
        match self {
            Self::Full(task) | Self::Closed(task) => task,
        }
    }
}

/// Shared dependencies handed to every worker loop.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub gates: Gates,
    pub engines: Engines,
    pub skip_abandoned: bool,
}

/// Handle to a worker: its queue's sending side plus its state.
pub struct Worker {
    id: WorkerId,
    tx: mpsc::Sender<WorkerMessage>,
    state: Arc<StateCell>,
}

impl Worker {
    /// Build a worker handle and the loop that will drain its queue.
    pub(crate) fn new(id: WorkerId, capacity: usize) -> (Self, WorkerLoop) {
        let (tx, rx) = mpsc::channel(capacity);
        let state = Arc::new(StateCell::new(id));
        (
            Self {
                id,
                tx,
                state: Arc::clone(&state),
            },
            WorkerLoop { id, rx, state },
        )
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Tasks waiting in the queue. The task being processed is not counted.
    pub fn queue_len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn try_enqueue(&self, task: Task) -> Result<(), EnqueueError> {
        match self.tx.try_reserve() {
            Ok(permit) => {
                permit.send(WorkerMessage::Run(task));
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(())) => Err(EnqueueError::Full(task)),
            Err(mpsc::error::TrySendError::Closed(())) => Err(EnqueueError::Closed(task)),
        }
    }

    /// Wait for queue space until `deadline`.
    pub async fn enqueue_until(&self, task: Task, deadline: Instant) -> Result<(), EnqueueError> {
        match tokio::time::timeout_at(deadline, self.tx.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(WorkerMessage::Run(task));
                Ok(())
            }
            Ok(Err(_)) => Err(EnqueueError::Closed(task)),
            Err(_) => Err(EnqueueError::Full(task)),
        }
    }

    /// Queue the stop marker behind whatever is already queued.
    pub(crate) async fn stop(&self) {
        if self.tx.send(WorkerMessage::Stop).await.is_err() {
            tracing::debug!(worker = %self.id, "Worker already exited");
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("queued", &self.queue_len())
            .finish()
    }
}

/// Receiving side of a worker queue, run as its own tokio task.
pub(crate) struct WorkerLoop {
    id: WorkerId,
    rx: mpsc::Receiver<WorkerMessage>,
    state: Arc<StateCell>,
}

impl WorkerLoop {
    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) async fn run(mut self, ctx: Arc<WorkerContext>, ready: oneshot::Sender<WorkerId>) {
        tracing::debug!(worker = %self.id, "Worker started");
        let _ = ready.send(self.id);

        loop {
            match self.rx.recv().await {
                Some(WorkerMessage::Run(task)) => self.process(&ctx, task).await,
                Some(WorkerMessage::Stop) => break,
                None => {
                    tracing::debug!(worker = %self.id, "Worker queue dropped");
                    break;
                }
            }
        }

        self.drain();
        self.state.transition(WorkerState::Stopped);
        tracing::debug!(worker = %self.id, "Worker stopped");
    }

    /// Close the queue and fail anything left behind the stop marker.
    fn drain(&mut self) {
        self.rx.close();
        let mut drained = 0usize;
        while let Ok(message) = self.rx.try_recv() {
            if let WorkerMessage::Run(task) = message {
                let resolved = task
                    .slot()
                    .resolve(Outcome::Failure(STOPPING_MESSAGE.to_string()));
                debug_assert!(resolved.is_ok(), "drained task already resolved");
                drained += 1;
            }
        }
        if drained > 0 {
            tracing::info!(worker = %self.id, drained, "Failed tasks queued behind stop");
        }
    }

    async fn process(&self, ctx: &WorkerContext, task: Task) {
        self.state.transition(WorkerState::Processing);
        let started = std::time::Instant::now();

        let outcome = if ctx.skip_abandoned && task.slot().is_abandoned() {
            tracing::debug!(
                worker = %self.id,
                task = %task.id(),
                "Skipping task abandoned by its caller"
            );
            Outcome::TimedOut
        } else {
            execute(ctx, &task).await
        };

        tracing::debug!(
            worker = %self.id,
            task = %task.id(),
            outcome = outcome.as_str(),
            queued_for = ?task.age().saturating_sub(started.elapsed()),
            run_time = ?started.elapsed(),
            "Task finished"
        );
        // The slot logs a double resolve; debug builds also fail here.
        let resolved = task.slot().resolve(outcome);
        debug_assert!(resolved.is_ok(), "task {} resolved twice", task.id());
        self.state.transition(WorkerState::Idle);
    }
}

/// Run the engine call with the accelerator held. The permit is released
/// before this returns, on every path.
async fn execute(ctx: &WorkerContext, task: &Task) -> Outcome {
    let gate = ctx.gates.for_kind(task.kind());
    let call = AssertUnwindSafe(task.payload().invoke(&ctx.engines)).catch_unwind();

    match gate.scoped(call).await {
        Ok(Ok(Ok(output))) => Outcome::Success(output),
        Ok(Ok(Err(err))) => {
            tracing::warn!(
                task = %task.id(),
                kind = %task.kind(),
                error = %err,
                "Engine call failed"
            );
            Outcome::Failure(err.to_string())
        }
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(
                task = %task.id(),
                kind = %task.kind(),
                panic = %message,
                "Engine panicked"
            );
            Outcome::Failure(format!("engine panicked: {message}"))
        }
        Err(err) => {
            tracing::error!(task = %task.id(), error = %err, "Gate acquire failed");
            Outcome::Failure(err.to_string())
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateCapacity;
    use crate::testing::{MockEngine, chat_payload, engines_from};
    use crate::task::TaskOutput;
    use std::time::Duration;

    fn context(mock: &Arc<MockEngine>) -> Arc<WorkerContext> {
        Arc::new(WorkerContext {
            gates: Gates::new(&GateCapacity::default()).unwrap(),
            engines: engines_from(mock),
            skip_abandoned: false,
        })
    }

    fn id(index: usize) -> WorkerId {
        WorkerId {
            kind: TaskKind::Chat,
            index,
        }
    }

    async fn spawn(
        worker_loop: WorkerLoop,
        ctx: Arc<WorkerContext>,
    ) -> tokio::task::JoinHandle<()> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(worker_loop.run(ctx, ready_tx));
        ready_rx.await.unwrap();
        handle
    }

    #[test]
    fn worker_id_displays_kind_and_index() {
        assert_eq!(id(2).to_string(), "chat-2");
    }

    #[test]
    fn state_machine_rejects_illegal_transitions() {
        let cell = StateCell::new(id(0));
        assert_eq!(cell.get(), WorkerState::Idle);

        assert!(!cell.transition(WorkerState::Idle));
        assert!(cell.transition(WorkerState::Processing));
        assert!(!cell.transition(WorkerState::Stopped));
        assert!(cell.transition(WorkerState::Idle));
        assert!(cell.transition(WorkerState::Stopped));
        assert!(!cell.transition(WorkerState::Idle));
        assert_eq!(cell.get(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn queue_is_bounded_by_capacity() {
        let (worker, _loop) = Worker::new(id(0), 2);

        assert!(worker.try_enqueue(Task::new(chat_payload("a")).0).is_ok());
        assert!(worker.try_enqueue(Task::new(chat_payload("b")).0).is_ok());
        assert_eq!(worker.queue_len(), 2);

        let rejected = worker.try_enqueue(Task::new(chat_payload("c")).0);
        assert!(matches!(rejected, Err(EnqueueError::Full(_))));
    }

    #[tokio::test]
    async fn enqueue_until_gives_up_at_deadline() {
        let (worker, _loop) = Worker::new(id(0), 1);
        worker.try_enqueue(Task::new(chat_payload("a")).0).unwrap();

        let deadline = Instant::now() + Duration::from_millis(20);
        let result = worker
            .enqueue_until(Task::new(chat_payload("b")).0, deadline)
            .await;

        assert!(matches!(result, Err(EnqueueError::Full(_))));
    }

    #[tokio::test]
    async fn processes_task_and_returns_to_idle() {
        let mock = Arc::new(MockEngine::new());
        let (worker, worker_loop) = Worker::new(id(0), 4);
        let handle = spawn(worker_loop, context(&mock)).await;

        let (task, rx) = Task::new(chat_payload("hi"));
        worker.try_enqueue(task).unwrap();
        let outcome = rx.wait(Duration::from_secs(2)).await;

        assert_eq!(
            outcome,
            Outcome::Success(TaskOutput::Text("echo: hi".to_string()))
        );
        worker.stop().await;
        handle.await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn engine_failure_and_panic_do_not_stop_the_worker() {
        let mock = Arc::new(MockEngine::new());
        let ctx = context(&mock);
        let (worker, worker_loop) = Worker::new(id(0), 4);
        let handle = spawn(worker_loop, Arc::clone(&ctx)).await;

        mock.fail_next(1);
        let (task, rx) = Task::new(chat_payload("one"));
        worker.try_enqueue(task).unwrap();
        let failed = rx.wait(Duration::from_secs(2)).await;
        assert_eq!(
            failed,
            Outcome::Failure("engine request failed: mock failure".to_string())
        );

        mock.panic_next(1);
        let (task, rx) = Task::new(chat_payload("two"));
        worker.try_enqueue(task).unwrap();
        let panicked = rx.wait(Duration::from_secs(2)).await;
        assert_eq!(
            panicked,
            Outcome::Failure("engine panicked: mock engine panicked".to_string())
        );

        let (task, rx) = Task::new(chat_payload("three"));
        worker.try_enqueue(task).unwrap();
        assert!(rx.wait(Duration::from_secs(2)).await.is_success());

        // Permits came back after the failure and the panic.
        assert_eq!(ctx.gates.for_kind(TaskKind::Chat).held(), 0);

        worker.stop().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn tasks_behind_stop_marker_are_failed() {
        let mock = Arc::new(MockEngine::new());
        let (worker, worker_loop) = Worker::new(id(0), 4);

        worker.stop().await;
        let (task, rx) = Task::new(chat_payload("late"));
        worker.try_enqueue(task).unwrap();

        let handle = spawn(worker_loop, context(&mock)).await;
        handle.await.unwrap();

        assert_eq!(
            rx.wait(Duration::from_secs(1)).await,
            Outcome::Failure(STOPPING_MESSAGE.to_string())
        );
        assert_eq!(mock.calls(), 0);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn abandoned_task_is_skipped_when_enabled() {
        let mock = Arc::new(MockEngine::new());
        let ctx = Arc::new(WorkerContext {
            skip_abandoned: true,
            ..(*context(&mock)).clone()
        });
        let (worker, worker_loop) = Worker::new(id(0), 4);

        let (task, rx) = Task::new(chat_payload("gone"));
        drop(rx);
        worker.try_enqueue(task).unwrap();
        worker.stop().await;

        let handle = spawn(worker_loop, ctx).await;
        handle.await.unwrap();

        assert_eq!(mock.calls(), 0);
    }

    #[cfg(debug_assertions)]
    #[tokio::test]
    async fn resolving_a_task_twice_fails_loudly() {
        let mock = Arc::new(MockEngine::new());
        let (worker, worker_loop) = Worker::new(id(0), 4);
        let handle = spawn(worker_loop, context(&mock)).await;

        let (task, _rx) = Task::new(chat_payload("twice"));
        task.slot().resolve(Outcome::TimedOut).unwrap();
        worker.try_enqueue(task).unwrap();

        let joined = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap();
        assert!(joined.unwrap_err().is_panic());
    }

    #[test]
    fn panic_message_handles_common_payloads() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"boom".to_string()), "boom");
        assert_eq!(panic_message(&42u32), "unknown panic");
    }
}
