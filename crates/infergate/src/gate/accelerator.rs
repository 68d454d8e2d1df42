//! The two accelerators and their gates.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{GateError, ResourceGate};
use crate::config::GateCapacity;
use crate::task::TaskKind;

/// A physical accelerator that bounds concurrent inference calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accelerator {
    /// GPU 0: text and vision chat.
    Primary,
    /// GPU 1: transcription and speech synthesis.
    Secondary,
}

impl Accelerator {
    pub const ALL: [Accelerator; 2] = [Accelerator::Primary, Accelerator::Secondary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for Accelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One gate per accelerator, shared by every worker that needs it.
#[derive(Debug, Clone)]
pub struct Gates {
    primary: Arc<ResourceGate>,
    secondary: Arc<ResourceGate>,
}

impl Gates {
    pub fn new(capacity: &GateCapacity) -> Result<Self, GateError> {
        Ok(Self {
            primary: Arc::new(ResourceGate::new(
                Accelerator::Primary,
                capacity.primary,
            )?),
            secondary: Arc::new(ResourceGate::new(
                Accelerator::Secondary,
                capacity.secondary,
            )?),
        })
    }

    pub fn get(&self, accelerator: Accelerator) -> &Arc<ResourceGate> {
        match accelerator {
            Accelerator::Primary => &self.primary,
            Accelerator::Secondary => &self.secondary,
        }
    }

    /// The gate every task of `kind` must pass through.
    pub fn for_kind(&self, kind: TaskKind) -> &Arc<ResourceGate> {
        self.get(kind.accelerator())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResourceGate>> {
        [&self.primary, &self.secondary].into_iter()
    }
}
