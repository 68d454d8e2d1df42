//! ResultSlot - single-assignment handoff from a worker to the waiting caller.
//!
//! The writer half travels with the `Task`; the reader half stays with the
//! caller. Dropping the reader abandons the slot: a later write is discarded.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::task::{Outcome, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("result slot for task {0} already resolved")]
    AlreadyResolved(TaskId),
}

/// Writer half. Resolved at most once.
pub struct ResultSlot {
    task_id: TaskId,
    tx: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl ResultSlot {
    pub fn new(task_id: TaskId) -> (Self, SlotReceiver) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                task_id,
                tx: Mutex::new(Some(tx)),
            },
            SlotReceiver { task_id, rx },
        )
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    fn take_sender(&self) -> Option<oneshot::Sender<Outcome>> {
        match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Write the outcome. The first write wins; later writes are rejected.
    ///
    /// Writing to an abandoned slot succeeds and the outcome is discarded.
    pub fn resolve(&self, outcome: Outcome) -> Result<(), SlotError> {
        let Some(tx) = self.take_sender() else {
            tracing::error!(task = %self.task_id, "Bug: result slot resolved twice");
            return Err(SlotError::AlreadyResolved(self.task_id));
        };

        if let Err(outcome) = tx.send(outcome) {
            tracing::debug!(
                task = %self.task_id,
                outcome = outcome.as_str(),
                "Caller abandoned task, discarding outcome"
            );
        }
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        match self.tx.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// The caller stopped waiting (timed out or went away) before resolution.
    pub fn is_abandoned(&self) -> bool {
        let guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().is_some_and(|tx| tx.is_closed())
    }
}

impl std::fmt::Debug for ResultSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSlot")
            .field("task_id", &self.task_id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Reader half, held by the caller awaiting the outcome.
#[derive(Debug)]
pub struct SlotReceiver {
    task_id: TaskId,
    rx: oneshot::Receiver<Outcome>,
}

impl SlotReceiver {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Wait up to `timeout` for the outcome.
    pub async fn wait(self, timeout: Duration) -> Outcome {
        self.wait_until(Instant::now() + timeout).await
    }

    /// Wait until `deadline` for the outcome; `Outcome::TimedOut` after that.
    ///
    /// Timing out drops the receiver, which marks the slot abandoned.
    pub async fn wait_until(self, deadline: Instant) -> Outcome {
        match tokio::time::timeout_at(deadline, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                tracing::error!(task = %self.task_id, "Bug: task dropped without outcome");
                Outcome::Failure("task dropped without outcome".to_string())
            }
            Err(_) => Outcome::TimedOut,
        }
    }
}
