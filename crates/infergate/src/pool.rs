//! WorkerPool - a fixed set of workers serving one workload kind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{MAX_QUEUE_CAPACITY, QueuePolicy};
use crate::task::{Task, TaskKind};
use crate::worker::{EnqueueError, Worker, WorkerContext, WorkerId, WorkerLoop};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("{kind} pool needs at least one worker")]
    Empty { kind: TaskKind },
    #[error("{kind} queue capacity {capacity} is zero or exceeds the supported maximum")]
    InvalidCapacity { kind: TaskKind, capacity: usize },
    #[error("{kind} pool was already spawned")]
    AlreadySpawned { kind: TaskKind },
    #[error("worker {worker} exited before reporting ready")]
    WorkerLost { worker: WorkerId },
}

pub struct WorkerPool {
    kind: TaskKind,
    workers: Vec<Worker>,
    loops: Mutex<Vec<WorkerLoop>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl WorkerPool {
    /// Build `workers` queues of `capacity` tasks each. Nothing runs until
    /// [`spawn`](Self::spawn).
    pub fn new(kind: TaskKind, workers: usize, capacity: usize) -> Result<Self, PoolError> {
        if workers == 0 {
            return Err(PoolError::Empty { kind });
        }
        if capacity == 0 || capacity > MAX_QUEUE_CAPACITY {
            return Err(PoolError::InvalidCapacity { kind, capacity });
        }

        let (workers, loops): (Vec<Worker>, Vec<WorkerLoop>) = (0..workers)
            .map(|index| Worker::new(WorkerId { kind, index }, capacity))
            .unzip();

        Ok(Self {
            kind,
            workers,
            loops: Mutex::new(loops),
            handles: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Queue length per worker, in worker order.
    pub fn queue_lengths(&self) -> Vec<usize> {
        self.workers.iter().map(Worker::queue_len).collect()
    }

    /// Start every worker loop and wait until each has reported ready.
    pub async fn spawn(&self, ctx: Arc<WorkerContext>) -> Result<(), PoolError> {
        let loops = std::mem::take(&mut *lock(&self.loops));
        if loops.is_empty() {
            return Err(PoolError::AlreadySpawned { kind: self.kind });
        }

        let mut ready = Vec::with_capacity(loops.len());
        let mut handles = Vec::with_capacity(loops.len());
        for worker_loop in loops {
            let (ready_tx, ready_rx) = oneshot::channel();
            ready.push((worker_loop.id(), ready_rx));
            handles.push(tokio::spawn(worker_loop.run(Arc::clone(&ctx), ready_tx)));
        }
        lock(&self.handles).extend(handles);

        for (worker, ready_rx) in ready {
            ready_rx.await.map_err(|_| PoolError::WorkerLost { worker })?;
        }

        tracing::info!(kind = %self.kind, workers = self.workers.len(), "Worker pool ready");
        Ok(())
    }

    /// Place `task` on worker `index`'s queue.
    ///
    /// `Reject` fails immediately on a full queue; `Block` waits for space
    /// until `deadline`.
    pub async fn submit_to(
        &self,
        index: usize,
        task: Task,
        policy: QueuePolicy,
        deadline: Instant,
    ) -> Result<WorkerId, EnqueueError> {
        let Some(worker) = self.workers.get(index) else {
            tracing::error!(kind = %self.kind, index, "Bug: submit to unknown worker");
            return Err(EnqueueError::Closed(task));
        };

        match policy {
            QueuePolicy::Reject => worker.try_enqueue(task)?,
            QueuePolicy::Block => worker.enqueue_until(task, deadline).await?,
        }
        Ok(worker.id())
    }

    /// Send a stop marker to every worker and wait for all loops to exit.
    ///
    /// Tasks already queued ahead of the marker still run. Only the first
    /// call sends markers.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        for worker in &self.workers {
            worker.stop().await;
        }

        let handles = std::mem::take(&mut *lock(&self.handles));
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(kind = %self.kind, error = %err, "Worker loop panicked");
            }
        }
        tracing::debug!(kind = %self.kind, "Worker pool stopped");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("kind", &self.kind)
            .field("workers", &self.workers)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
