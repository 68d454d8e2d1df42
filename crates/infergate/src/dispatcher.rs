//! Dispatcher - admission and shortest-queue routing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::QueuePolicy;
use crate::pool::WorkerPool;
use crate::task::{InvalidPayload, Outcome, Payload, Task, TaskKind};
use crate::worker::{EnqueueError, WorkerId};

/// Why a submission was not admitted.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Workers are not running yet.
    #[error("service not ready")]
    NotReady,

    /// Shutdown has begun; no new work is admitted.
    #[error("service is shutting down")]
    ShuttingDown,

    /// Every queue of the pool is full.
    #[error("{kind} queue is full")]
    Backpressure { kind: TaskKind },

    #[error(transparent)]
    InvalidPayload(#[from] InvalidPayload),

    /// No pool serves this kind.
    #[error("no workers configured for {0}")]
    Unsupported(TaskKind),
}

/// Index of the worker with the fewest queued tasks; ties go to the lowest
/// index. `None` for an empty pool.
pub fn select_worker(queue_lengths: &[usize]) -> Option<usize> {
    queue_lengths
        .iter()
        .enumerate()
        .min_by_key(|&(index, &len)| (len, index))
        .map(|(index, _)| index)
}

const NOT_READY: u8 = 0;
const OPEN: u8 = 1;
const CLOSED: u8 = 2;

pub struct Dispatcher {
    pools: Vec<Arc<WorkerPool>>,
    policy: QueuePolicy,
    state: AtomicU8,
}

impl Dispatcher {
    /// Starts closed; call [`open`](Self::open) once the pools are running.
    pub fn new(pools: Vec<Arc<WorkerPool>>, policy: QueuePolicy) -> Self {
        Self {
            pools,
            policy,
            state: AtomicU8::new(NOT_READY),
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    pub fn pools(&self) -> &[Arc<WorkerPool>] {
        &self.pools
    }

    pub fn pool(&self, kind: TaskKind) -> Option<&Arc<WorkerPool>> {
        self.pools.iter().find(|pool| pool.kind() == kind)
    }

    /// Start admitting work. A closed dispatcher stays closed.
    pub fn open(&self) {
        let _ = self
            .state
            .compare_exchange(NOT_READY, OPEN, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Stop admitting work. Tasks already admitted are unaffected.
    pub fn close(&self) {
        self.state.store(CLOSED, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    fn check_open(&self) -> Result<(), SubmitError> {
        match self.state.load(Ordering::Acquire) {
            OPEN => Ok(()),
            NOT_READY => Err(SubmitError::NotReady),
            _ => Err(SubmitError::ShuttingDown),
        }
    }

    /// Route `task` to a worker of its kind's pool.
    ///
    /// On error the task is dropped; its receiver must not be awaited.
    pub async fn submit(&self, task: Task, deadline: Instant) -> Result<WorkerId, SubmitError> {
        self.check_open()?;
        let kind = task.kind();
        let pool = self.pool(kind).ok_or(SubmitError::Unsupported(kind))?;

        match self.policy {
            QueuePolicy::Reject => {
                let lengths = pool.queue_lengths();
                let mut order: Vec<usize> = (0..lengths.len()).collect();
                order.sort_by_key(|&index| (lengths[index], index));

                let mut task = task;
                for index in order {
                    match pool.submit_to(index, task, QueuePolicy::Reject, deadline).await {
                        Ok(worker) => return Ok(worker),
                        Err(EnqueueError::Full(returned)) => task = returned,
                        Err(EnqueueError::Closed(_)) => return Err(SubmitError::ShuttingDown),
                    }
                }
                tracing::warn!(kind = %kind, task = %task.id(), "All queues full, rejecting task");
                Err(SubmitError::Backpressure { kind })
            }
            QueuePolicy::Block => {
                let index = select_worker(&pool.queue_lengths())
                    .ok_or(SubmitError::Unsupported(kind))?;
                match pool.submit_to(index, task, QueuePolicy::Block, deadline).await {
                    Ok(worker) => Ok(worker),
                    Err(EnqueueError::Full(task)) => {
                        tracing::warn!(
                            kind = %kind,
                            task = %task.id(),
                            "Queue stayed full until deadline"
                        );
                        Err(SubmitError::Backpressure { kind })
                    }
                    Err(EnqueueError::Closed(_)) => Err(SubmitError::ShuttingDown),
                }
            }
        }
    }

    /// Validate, submit and wait for the outcome, all within `timeout`.
    ///
    /// Expiry yields `Outcome::TimedOut`; the task itself keeps its place and
    /// its late outcome is discarded.
    pub async fn submit_and_wait(
        &self,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Outcome, SubmitError> {
        payload.validate()?;

        let deadline = Instant::now() + timeout;
        let (task, receiver) = Task::new(payload);
        let task_id = task.id();
        let worker = self.submit(task, deadline).await?;
        tracing::debug!(task = %task_id, worker = %worker, "Task admitted");

        let outcome = receiver.wait_until(deadline).await;
        if outcome.is_timed_out() {
            tracing::warn!(task = %task_id, worker = %worker, ?timeout, "Task timed out");
        }
        Ok(outcome)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("policy", &self.policy)
            .field("accepting", &self.is_accepting())
            .field("pools", &self.pools.len())
            .finish()
    }
}
