//! Counting permit pool for one accelerator.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::Accelerator;

tokio::task_local! {
    /// Accelerators whose permit is held by the current task's `scoped` section.
    static HELD_GATES: Vec<Accelerator>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("gate capacity for {0} must be at least 1")]
    ZeroCapacity(Accelerator),
    #[error("gate capacity {capacity} for {accelerator} exceeds the supported maximum")]
    CapacityTooLarge {
        accelerator: Accelerator,
        capacity: usize,
    },
    #[error("re-entrant acquire on the {0} gate")]
    Reentrant(Accelerator),
    #[error("{0} gate is closed")]
    Closed(Accelerator),
}

/// A held accelerator permit. Returned to the gate on drop.
#[must_use = "dropping the permit releases the accelerator immediately"]
pub struct GatePermit {
    accelerator: Accelerator,
    acquired_at: Instant,
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    pub fn accelerator(&self) -> Accelerator {
        self.accelerator
    }

    pub fn held_for(&self) -> std::time::Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        tracing::trace!(
            accelerator = %self.accelerator,
            held_for = ?self.acquired_at.elapsed(),
            "Gate permit released"
        );
    }
}

/// Decrements the waiter count when an acquire completes or is cancelled.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Permit pool guarding one physical accelerator.
///
/// Waiters are served in FIFO order (tokio's semaphore is fair), so a burst of
/// one workload kind cannot starve another kind sharing the same accelerator.
/// `held` never exceeds `capacity`: permits only come back through
/// [`GatePermit`]'s drop, so there is no way to over-release.
pub struct ResourceGate {
    accelerator: Accelerator,
    capacity: usize,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
}

impl ResourceGate {
    pub fn new(accelerator: Accelerator, capacity: usize) -> Result<Self, GateError> {
        if capacity == 0 {
            return Err(GateError::ZeroCapacity(accelerator));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(GateError::CapacityTooLarge {
                accelerator,
                capacity,
            });
        }

        Ok(Self {
            accelerator,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            waiting: AtomicUsize::new(0),
        })
    }

    pub fn accelerator(&self) -> Accelerator {
        self.accelerator
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently handed out.
    pub fn held(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Callers currently suspended in `acquire`.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    fn held_in_current_scope(&self) -> bool {
        HELD_GATES
            .try_with(|held| held.contains(&self.accelerator))
            .unwrap_or(false)
    }

    /// Suspend until a permit is free.
    ///
    /// Fails with [`GateError::Reentrant`] when called from inside a `scoped`
    /// section of this same gate; with capacity 1 that call would otherwise
    /// deadlock.
    pub async fn acquire(&self) -> Result<GatePermit, GateError> {
        if self.held_in_current_scope() {
            tracing::error!(accelerator = %self.accelerator, "Bug: re-entrant gate acquire");
            return Err(GateError::Reentrant(self.accelerator));
        }

        let permit = {
            let _waiting = WaitingGuard::enter(&self.waiting);
            Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| GateError::Closed(self.accelerator))?
        };

        tracing::trace!(
            accelerator = %self.accelerator,
            held = self.held(),
            capacity = self.capacity,
            "Gate permit acquired"
        );

        Ok(GatePermit {
            accelerator: self.accelerator,
            acquired_at: Instant::now(),
            _permit: permit,
        })
    }

    /// Run `fut` while holding a permit.
    ///
    /// The permit is released when `fut` completes, and also when the returned
    /// future is dropped mid-flight.
    pub async fn scoped<F, T>(&self, fut: F) -> Result<T, GateError>
    where
        F: Future<Output = T>,
    {
        let permit = self.acquire().await?;

        let mut held = HELD_GATES
            .try_with(|held| held.clone())
            .unwrap_or_default();
        held.push(self.accelerator);
        let output = HELD_GATES.scope(held, fut).await;

        drop(permit);
        Ok(output)
    }
}

impl std::fmt::Debug for ResourceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGate")
            .field("accelerator", &self.accelerator)
            .field("capacity", &self.capacity)
            .field("held", &self.held())
            .field("waiting", &self.waiting())
            .finish()
    }
}
