//! Accelerator gating.
//!
//! Every call into an accelerator-bound engine happens while holding a permit
//! from that accelerator's [`ResourceGate`]. Permits are RAII guards:
//! - `ResourceGate::acquire` → `GatePermit` (released exactly once on drop)
//! - `ResourceGate::scoped` runs a future with a permit held and releases it
//!   on every exit path, including cancellation of the future itself.

mod accelerator;
mod resource;

pub use accelerator::{Accelerator, Gates};
pub use resource::{GateError, GatePermit, ResourceGate};
