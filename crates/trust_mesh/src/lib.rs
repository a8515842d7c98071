//! Trust Mesh
//!
//! This crate holds the per-federation trust state:
//! - Node Registry with per-node atomic mutations and durable restore
//! - Trust Score Engine (weighted metrics to fixed-point score)
//! - Scheduled trust updater fed by a metrics source
//! - Policy Gate boundary with a fail-closed timeout guard
//!
//! The relay and audit layers consult the registry for keys, scores and
//! status; they never mutate it.

pub mod policy;
pub mod registry;
pub mod trust;
pub mod updater;

pub use policy::{
    AllowAllPolicyGate, GuardedPolicyGate, LocalPolicyGate, PolicyAction, PolicyContext,
    PolicyDecision, PolicyError, PolicyGate, TIMEOUT_REASON,
};
pub use registry::{screen_registration, NodeRegistry, Registration, RegistryError};
pub use trust::{TrustError, TrustScoreEngine, TrustUpdate};
pub use updater::{MetricsSource, RegistryProvider, StaticMetricsSource, SweepReport, TrustUpdater};
