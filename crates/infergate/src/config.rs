//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gate::Accelerator;

/// Largest per-worker queue a bounded tokio channel can hold.
pub const MAX_QUEUE_CAPACITY: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// What happens when every worker queue of a pool is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Fail the submission with backpressure.
    #[default]
    Reject,
    /// Suspend the submitter until a slot frees (bounded by its deadline).
    Block,
}

/// Permits per accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateCapacity {
    pub primary: usize,
    pub secondary: usize,
}

impl Default for GateCapacity {
    fn default() -> Self {
        Self {
            primary: 1,
            secondary: 1,
        }
    }
}

impl GateCapacity {
    pub fn for_accelerator(&self, accelerator: Accelerator) -> usize {
        match accelerator {
            Accelerator::Primary => self.primary,
            Accelerator::Secondary => self.secondary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("workers_per_pool must be at least 1")]
    NoWorkers,
    #[error("queue_capacity_per_worker must be at least 1")]
    NoQueueCapacity,
    #[error("queue_capacity_per_worker {0} exceeds the supported maximum")]
    QueueCapacityTooLarge(usize),
    #[error("gate capacity for {0} must be at least 1")]
    NoGateCapacity(Accelerator),
    #[error("gate capacity {capacity} for {accelerator} exceeds the supported maximum")]
    GateCapacityTooLarge {
        accelerator: Accelerator,
        capacity: usize,
    },
    #[error("request_timeout must be positive")]
    ZeroTimeout,
}

/// Knobs for the scheduling core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub workers_per_pool: usize,
    pub queue_capacity_per_worker: usize,
    pub gate_capacity: GateCapacity,
    #[serde(with = "secs_f64")]
    pub request_timeout: Duration,
    pub queue_policy: QueuePolicy,
    /// Resolve tasks whose caller already gave up as `TimedOut` without
    /// invoking the engine.
    pub skip_abandoned_tasks: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers_per_pool: 1,
            queue_capacity_per_worker: 100,
            gate_capacity: GateCapacity::default(),
            request_timeout: Duration::from_secs(30),
            queue_policy: QueuePolicy::Reject,
            skip_abandoned_tasks: false,
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers_per_pool(mut self, workers: usize) -> Self {
        self.workers_per_pool = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity_per_worker = capacity;
        self
    }

    pub fn with_gate_capacity(mut self, primary: usize, secondary: usize) -> Self {
        self.gate_capacity = GateCapacity { primary, secondary };
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    pub fn with_skip_abandoned_tasks(mut self, skip: bool) -> Self {
        self.skip_abandoned_tasks = skip;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers_per_pool == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.queue_capacity_per_worker == 0 {
            return Err(ConfigError::NoQueueCapacity);
        }
        if self.queue_capacity_per_worker > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::QueueCapacityTooLarge(
                self.queue_capacity_per_worker,
            ));
        }
        for accelerator in Accelerator::ALL {
            let capacity = self.gate_capacity.for_accelerator(accelerator);
            if capacity == 0 {
                return Err(ConfigError::NoGateCapacity(accelerator));
            }
            if capacity > tokio::sync::Semaphore::MAX_PERMITS {
                return Err(ConfigError::GateCapacityTooLarge {
                    accelerator,
                    capacity,
                });
            }
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

/// Durations as (fractional) seconds in config files.
mod secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
