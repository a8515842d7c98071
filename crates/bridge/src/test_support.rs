//! Shared fixture for bridge unit tests.

use crate::bridge::ProofBridge;
use crate::directory::FederationDirectory;
use fedrelay_core::{ManualClock, MemoryStore, NodeMetrics, RelayConfig, SCORE_SCALE};
use fedrelay_crypto::NodeSigner;
use fedrelay_trust_mesh::{
    GuardedPolicyGate, LocalPolicyGate, PolicyGate, Registration, TrustScoreEngine,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const START_MS: u64 = 1_700_000_000_000;

pub struct Fixture {
    pub config: RelayConfig,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub directory: Arc<FederationDirectory>,
    pub bridge: ProofBridge,
    /// Key of `oc_n01` in `opencore`
    pub signer: NodeSigner,
    /// Key of `tn_n01` in `trustnet`
    pub peer_signer: NodeSigner,
}

impl Fixture {
    pub async fn new() -> Self {
        let config = RelayConfig::default();
        let gate = Arc::new(LocalPolicyGate::from_config(&config.policy, &config.relay));
        Self::with_gate(gate, Duration::from_millis(config.relay.policy_timeout_ms)).await
    }

    /// Registration uses the local policy; `gate` is consulted by the bridge
    pub async fn with_gate(gate: Arc<dyn PolicyGate>, timeout: Duration) -> Self {
        let config = RelayConfig::default();
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(START_MS));
        let local = GuardedPolicyGate::new(
            Arc::new(LocalPolicyGate::from_config(&config.policy, &config.relay)),
            config.relay.policy_timeout(),
        );

        let directory = Arc::new(
            FederationDirectory::open(
                store.clone(),
                store.clone(),
                local,
                clock.clone(),
                &config.trust,
                &config.relay,
            )
            .unwrap(),
        );
        let bridge = ProofBridge::new(
            directory.clone(),
            GuardedPolicyGate::new(gate, timeout),
            clock.clone(),
            &config.trust,
            &config.relay,
        );

        let signer = NodeSigner::generate();
        let peer_signer = NodeSigner::generate();
        let fixture = Self {
            config,
            store,
            clock,
            directory,
            bridge,
            signer,
            peer_signer,
        };
        fixture.register("opencore", "oc_n01", fixture.signer.public_key()).await;
        fixture.register("trustnet", "tn_n01", fixture.peer_signer.public_key()).await;
        fixture
    }

    pub async fn register(&self, federation_id: &str, node_id: &str, public_key: [u8; 32]) {
        self.directory
            .get_or_create(federation_id)
            .unwrap()
            .registry()
            .register(Registration {
                node_id: node_id.to_string(),
                federation_id: federation_id.to_string(),
                public_key: public_key.to_vec(),
                stake_amount: 500_000,
                metadata: BTreeMap::new(),
            })
            .await
            .unwrap();
    }

    /// Drive a node's score to `score` through the trust engine
    pub fn set_score(&self, federation_id: &str, node_id: &str, score: u64) {
        let ratio = score as f64 / SCORE_SCALE as f64;
        let metrics = NodeMetrics {
            uptime_percentage: ratio * 100.0,
            proof_success_rate: ratio,
            avg_latency_ms: ((1.0 - ratio) * 500.0).round() as u64,
            stake_amount: (ratio * 500_000.0).round() as u64,
        };
        let registry = self.directory.get(federation_id).unwrap().registry().clone();
        let update = TrustScoreEngine::new(&self.config.trust)
            .update(&registry, node_id, &metrics)
            .unwrap();
        assert_eq!(update.score, score);
    }
}
