//! Durable stores for the node registry, proofs and audit cycles.
//!
//! Components receive these traits as `Arc<dyn ...>` and never reach for a
//! global. `MemoryStore` backs tests and ephemeral nodes; `SqliteStore` is
//! the durable backend. Proof records and sealed cycles are append-only in
//! both.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::types::{AuditCycle, Node, Proof};
use thiserror::Error;

/// Errors that can occur in store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record already exists: {0}")]
    DuplicateKey(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record is immutable: {0}")]
    ImmutableRecord(String),

    #[error("Nonce already recorded: {0}")]
    DuplicateNonce(String),

    #[error("Audit cycle {0} is sealed")]
    SealedCycle(u64),

    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence for registered nodes, keyed by `(federation_id, node_id)`
pub trait NodeStore: Send + Sync {
    /// Insert a new node; `DuplicateKey` if it already exists
    fn insert_node(&self, node: &Node) -> Result<()>;

    /// Overwrite an existing node; `NotFound` if it was never inserted
    fn update_node(&self, node: &Node) -> Result<()>;

    fn load_node(&self, federation_id: &str, node_id: &str) -> Result<Option<Node>>;

    /// All nodes of a federation in registration order
    fn load_nodes(&self, federation_id: &str) -> Result<Vec<Node>>;

    /// Federation ids in order of their first registration
    fn federations(&self) -> Result<Vec<String>>;
}

/// Append-only persistence for proof records, keyed by `(federation_id, proof_id)`
pub trait ProofStore: Send + Sync {
    /// Append a proof. Returns `Ok(false)` if an identical record is already
    /// stored and `ImmutableRecord` if a different one is. A federation holds
    /// at most one record per nonce; another proof id carrying a recorded
    /// nonce is `DuplicateNonce`.
    fn append_proof(&self, proof: &Proof, recorded_at: u64) -> Result<bool>;

    fn get_proof(&self, federation_id: &str, proof_id: &str) -> Result<Option<Proof>>;

    /// Proofs written to a federation's store in `[from_ms, to_ms)`.
    /// `u64::MAX` as `to_ms` leaves the window open-ended.
    fn proofs_recorded_between(
        &self,
        federation_id: &str,
        from_ms: u64,
        to_ms: u64,
    ) -> Result<Vec<Proof>>;

    fn proof_count(&self, federation_id: &str) -> Result<u64>;

    /// Federation ids holding at least one proof, in order of their first proof
    fn federations_with_proofs(&self) -> Result<Vec<String>>;
}

/// Persistence for audit cycles; sealed cycles cannot be rewritten
pub trait CycleStore: Send + Sync {
    /// Insert or update a cycle; `SealedCycle` if the stored copy is completed
    fn save_cycle(&self, cycle: &AuditCycle) -> Result<()>;

    /// All cycles ordered by cycle number
    fn load_cycles(&self) -> Result<Vec<AuditCycle>>;
}
