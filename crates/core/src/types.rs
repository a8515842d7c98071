//! Shared data model: nodes, proofs, relay results and audit cycles.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Fixed-point scale for trust scores (1.0 == 1_000_000)
pub const SCORE_SCALE: u64 = 1_000_000;

/// Minimum score for a node to stay active (inclusive)
pub const MIN_TRUST_SCORE: u64 = 750_000;

/// Minimum score for a node to relay proofs across federations (inclusive)
pub const RELAY_MIN_TRUST: u64 = 900_000;

/// Score assigned at registration
pub const INITIAL_TRUST_SCORE: u64 = SCORE_SCALE;

/// Ed25519 public key length in bytes
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 signature length in bytes
pub const SIGNATURE_LEN: usize = 64;

/// BLAKE3 digest length in bytes
pub const DIGEST_LEN: usize = 32;

/// A 32-byte BLAKE3 digest
pub type Digest = [u8; DIGEST_LEN];

/// Participation status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Inactive,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(NodeStatus::Active),
            "inactive" => Ok(NodeStatus::Inactive),
            other => Err(format!("unknown node status: {}", other)),
        }
    }
}

/// Observed operational metrics for a node, input to trust scoring
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    /// Uptime over the observation window (0 to 100)
    pub uptime_percentage: f64,
    /// Fraction of proofs that verified (0.0 to 1.0)
    pub proof_success_rate: f64,
    /// Mean relay latency in milliseconds
    pub avg_latency_ms: u64,
    /// Token-denominated stake
    pub stake_amount: u64,
}

/// A registered federation participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the federation
    pub node_id: String,
    pub federation_id: String,
    /// Ed25519 verifying key
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub stake_amount: u64,
    /// Derived score, scaled by `SCORE_SCALE`
    pub trust_score: u64,
    pub status: NodeStatus,
    pub uptime_percentage: f64,
    pub proof_success_rate: f64,
    pub avg_latency_ms: u64,
    /// Unix milliseconds of the last score write
    pub last_updated: u64,
    /// Set by explicit administrative deactivation; blocks automatic reactivation
    pub administratively_suspended: bool,
    /// Registration metadata (admitted by policy)
    pub metadata: BTreeMap<String, String>,
}

impl Node {
    /// Create a freshly registered node with maximal trust.
    pub fn registered(
        node_id: impl Into<String>,
        federation_id: impl Into<String>,
        public_key: [u8; PUBLIC_KEY_LEN],
        stake_amount: u64,
        metadata: BTreeMap<String, String>,
        now_ms: u64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            federation_id: federation_id.into(),
            public_key,
            stake_amount,
            trust_score: INITIAL_TRUST_SCORE,
            status: NodeStatus::Active,
            uptime_percentage: 100.0,
            proof_success_rate: 1.0,
            avg_latency_ms: 0,
            last_updated: now_ms,
            administratively_suspended: false,
            metadata,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// Trust score as a float in [0.0, 1.0]
    pub fn trust_ratio(&self) -> f64 {
        self.trust_score as f64 / SCORE_SCALE as f64
    }
}

/// A signed proof digest, stored independently at every federation it reaches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub proof_id: String,
    /// Federation whose store holds this record
    pub federation_id: String,
    /// Federation where the proof was created
    pub origin_federation_id: String,
    /// Creating node
    pub node_id: String,
    /// BLAKE3 digest of the canonical, allow-listed payload
    pub digest: Digest,
    /// Detached Ed25519 signature over `digest`
    pub signature: Vec<u8>,
    /// Unix milliseconds
    pub timestamp: u64,
    /// Replay-protection token
    pub nonce: String,
    /// Sorted names of the hashed payload fields (no values)
    pub payload_fields: Vec<String>,
}

impl Proof {
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// Outcome classification of one relay attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    SignatureInvalid,
    TrustInsufficient,
    ReplayDetected,
}

/// Result of a successful relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResult {
    pub source_digest: Digest,
    pub target_digest: Digest,
    pub verification_status: VerificationStatus,
    /// Id of the proof record written at the target federation
    pub target_proof_id: String,
}

/// One federation's contribution to an audit cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationRoot {
    pub root: Digest,
    /// Number of proofs (unpadded leaves)
    pub leaf_count: u64,
    /// Proof digests in tree order (sorted by proof id)
    pub leaves: Vec<Digest>,
}

/// A periodic anchoring of all proofs relayed since the previous cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditCycle {
    pub cycle_number: u64,
    /// Unix milliseconds
    pub started_at: u64,
    /// Keyed by federation id, in submission order
    pub federation_merkle_roots: IndexMap<String, FederationRoot>,
    /// Derived at seal time
    pub global_root: Option<Digest>,
    pub total_proofs: u64,
    pub completed: bool,
    pub sealed_at: Option<u64>,
    /// Coordinator Ed25519 signature over `global_root`
    pub seal_signature: Option<Vec<u8>>,
}

impl AuditCycle {
    pub fn open(cycle_number: u64, started_at: u64) -> Self {
        Self {
            cycle_number,
            started_at,
            federation_merkle_roots: IndexMap::new(),
            global_root: None,
            total_proofs: 0,
            completed: false,
            sealed_at: None,
            seal_signature: None,
        }
    }

    /// Sum of leaves across all submitted trees
    pub fn submitted_leaf_count(&self) -> u64 {
        self.federation_merkle_roots
            .values()
            .map(|r| r.leaf_count)
            .sum()
    }
}
