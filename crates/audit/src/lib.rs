//! Audit cycles
//!
//! Anchors every proof recorded by every federation into per-federation
//! Merkle roots and one global root per cycle:
//! - `AuditCoordinator`: the `Idle -> Collecting -> Sealed` state machine
//! - `AuditScheduler`: the single periodic driver of that state machine
//!
//! Sealed cycles are immutable; inclusion of any proof digest can be checked
//! later against them with a Merkle path.

pub mod coordinator;
pub mod scheduler;

pub use coordinator::{AuditCoordinator, AuditError, CycleState};
pub use scheduler::{AuditScheduler, SealedCycle};
