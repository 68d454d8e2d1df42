//! Service state and status snapshots.

use serde::{Deserialize, Serialize};

use crate::gate::Accelerator;
use crate::task::TaskKind;
use crate::worker::WorkerState;

/// Lifecycle state of the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    /// Engines initializing, workers not running yet
    #[default]
    Starting,
    /// Accepting tasks
    Ready,
    /// Draining; new tasks are refused
    Stopping,
    /// Workers joined, engines released
    Stopped,
    /// Startup aborted
    StartupFailed,
}

impl ServiceState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub id: String,
    pub kind: TaskKind,
    pub queued: usize,
    pub capacity: usize,
    pub state: WorkerState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStatus {
    pub accelerator: Accelerator,
    pub capacity: usize,
    pub held: usize,
    pub waiting: usize,
}

/// Point-in-time view of queues and gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: ServiceState,
    pub workers: Vec<WorkerStatus>,
    pub gates: Vec<GateStatus>,
}

impl StatusSnapshot {
    /// Total queued tasks for `kind` across its workers.
    pub fn queued(&self, kind: TaskKind) -> usize {
        self.workers
            .iter()
            .filter(|w| w.kind == kind)
            .map(|w| w.queued)
            .sum()
    }

    pub fn gate(&self, accelerator: Accelerator) -> Option<&GateStatus> {
        self.gates.iter().find(|g| g.accelerator == accelerator)
    }
}
