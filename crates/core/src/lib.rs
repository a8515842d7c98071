//! Core functionality for the FedRelay federation trust and proof relay system.
//!
//! This crate provides the shared data model, configuration, logging, event
//! schema, clock abstraction and durable stores used across the FedRelay
//! workspace.

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AuditSection, NodeSection, PolicySection, RelayConfig, RelaySection, TrustSection,
};
pub use error::{CoreError, Result};
pub use event::{Event, EventBuilder, EventCategory, EventMetadata, EventSeverity};
pub use store::{CycleStore, MemoryStore, NodeStore, ProofStore, StoreError};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use types::{
    AuditCycle, Digest, FederationRoot, Node, NodeMetrics, NodeStatus, Proof, RelayResult,
    VerificationStatus, DIGEST_LEN, INITIAL_TRUST_SCORE, MIN_TRUST_SCORE, PUBLIC_KEY_LEN,
    RELAY_MIN_TRUST, SCORE_SCALE, SIGNATURE_LEN,
};
