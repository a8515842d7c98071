//! Test utilities for cross-crate integration tests

use fedrelay_audit::{AuditScheduler, SealedCycle};
use fedrelay_core::{ManualClock, MemoryStore, NodeMetrics, ProofStore, RelayConfig, SqliteStore};
use fedrelay_crypto::NodeSigner;
use fedrelay_node::{RelayService, Stores};
use fedrelay_trust_mesh::LocalPolicyGate;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Fixed start of simulated time (Unix ms)
pub const START_MS: u64 = 1_700_000_000_000;

pub const DAY: Duration = Duration::from_secs(86_400);

/// Install a test subscriber once; later calls are no-ops
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Test fixture for a registered node with its Ed25519 key
pub struct TestNode {
    pub node_id: String,
    pub federation_id: String,
    pub signer: NodeSigner,
}

impl TestNode {
    pub fn new(federation_id: &str, node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            federation_id: federation_id.to_string(),
            signer: NodeSigner::generate(),
        }
    }

    /// Register this node with the given stake
    pub async fn register(&self, service: &RelayService, stake_amount: u64) {
        service
            .register_node(
                &self.node_id,
                &self.federation_id,
                &self.signer.public_key(),
                stake_amount,
                BTreeMap::new(),
            )
            .await
            .unwrap();
    }
}

/// Service over a manual clock
pub struct TestNetwork {
    pub service: RelayService,
    pub clock: Arc<ManualClock>,
    pub proofs: Arc<dyn ProofStore>,
}

impl TestNetwork {
    pub fn in_memory() -> Self {
        let clock = Arc::new(ManualClock::new(START_MS));
        let store = Arc::new(MemoryStore::new());
        let service = open_service(Stores::shared(store.clone()), clock.clone());
        Self {
            service,
            clock,
            proofs: store,
        }
    }

    /// Open (or reopen) a network persisted at `path`
    pub fn sqlite(path: &Path, clock: Arc<ManualClock>) -> Self {
        let store = Arc::new(SqliteStore::open(path).unwrap());
        let service = open_service(Stores::shared(store.clone()), clock.clone());
        Self {
            service,
            clock,
            proofs: store,
        }
    }

    /// Register a fresh node and return it
    pub async fn node(&self, federation_id: &str, node_id: &str) -> TestNode {
        let node = TestNode::new(federation_id, node_id);
        node.register(&self.service, 500_000).await;
        node
    }

    /// Advance a day and run one scheduler tick
    pub fn seal_next_cycle(&self) -> SealedCycle {
        self.clock.advance(DAY);
        AuditScheduler::new(
            self.service.audit().clone(),
            self.proofs.clone(),
            Duration::from_secs(60),
        )
        .tick()
        .unwrap()
        .unwrap()
    }
}

fn open_service(stores: Stores, clock: Arc<ManualClock>) -> RelayService {
    let config = RelayConfig::default();
    let policy = Arc::new(LocalPolicyGate::from_config(&config.policy, &config.relay));
    RelayService::open(config, stores, policy, clock, Some(NodeSigner::from_key(&[7u8; 32]).unwrap()))
        .unwrap()
}

/// Unique SQLite path under the temp directory
pub fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("fedrelay_it_{}.db", uuid::Uuid::new_v4()))
}

/// Remove a SQLite database and its WAL side files
pub fn cleanup_db(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(file));
    }
}

/// Metrics of the reference operator: 99.8% uptime, 98% success, 45 ms, full stake
pub fn reference_metrics() -> NodeMetrics {
    NodeMetrics {
        uptime_percentage: 99.8,
        proof_success_rate: 0.98,
        avg_latency_ms: 45,
        stake_amount: 500_000,
    }
}

/// Metrics whose score is exactly `ratio` of the scale
pub fn metrics_at(ratio: f64) -> NodeMetrics {
    NodeMetrics {
        uptime_percentage: ratio * 100.0,
        proof_success_rate: ratio,
        avg_latency_ms: ((1.0 - ratio) * 500.0).round() as u64,
        stake_amount: (ratio * 500_000.0).round() as u64,
    }
}

/// A settlement claim; `n` makes the digest unique
pub fn claim(n: u64) -> Map<String, Value> {
    json!({
        "claim_type": "settlement",
        "reference": format!("S-{}", n),
        "amount": 1000 + n,
        "currency": "EUR"
    })
    .as_object()
    .cloned()
    .unwrap()
}
