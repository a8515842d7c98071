//! Proof Bridge
//!
//! Moves signed proof digests between federations:
//! - Federation directory (registry, proof store view and replay cache per federation)
//! - Proof creation over canonical, allow-listed payloads
//! - Relay protocol: signature, trust bar, replay window, policy, persistence
//! - Sharded replay-nonce cache with background eviction
//!
//! A relay either completes with identical source and target digests or
//! leaves no trace at the target.

pub mod bridge;
pub mod directory;
pub mod proof;
pub mod relay;
pub mod replay;

#[cfg(test)]
mod test_support;

pub use bridge::ProofBridge;
pub use directory::{Federation, FederationDirectory};
pub use proof::BridgeError;
pub use relay::{relayed_proof_id, RelayError};
pub use replay::{ReplayCache, ReplayError};
