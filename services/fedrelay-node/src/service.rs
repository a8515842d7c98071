//! Relay service facade.
//!
//! Wires stores, registries, the proof bridge and the audit coordinator
//! together and exposes the node's operations. Every operation returns the
//! error type of the component that owns it.

use fedrelay_audit::{AuditCoordinator, AuditError, AuditScheduler};
use fedrelay_bridge::{BridgeError, FederationDirectory, ProofBridge, RelayError};
use fedrelay_core::{
    Clock, CoreError, CycleStore, Digest, Node, NodeMetrics, NodeStore, Proof, ProofStore,
    RelayConfig, RelayResult,
};
use fedrelay_crypto::{MerklePath, NodeSigner, PathStep};
use fedrelay_trust_mesh::{
    GuardedPolicyGate, MetricsSource, PolicyGate, Registration, RegistryError, TrustError,
    TrustScoreEngine, TrustUpdater,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}

/// Store handles; one backend usually serves all three
#[derive(Clone)]
pub struct Stores {
    pub nodes: Arc<dyn NodeStore>,
    pub proofs: Arc<dyn ProofStore>,
    pub cycles: Arc<dyn CycleStore>,
}

impl Stores {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: NodeStore + ProofStore + CycleStore + 'static,
    {
        Self {
            nodes: store.clone(),
            proofs: store.clone(),
            cycles: store,
        }
    }
}

pub struct RelayService {
    config: RelayConfig,
    stores: Stores,
    directory: Arc<FederationDirectory>,
    bridge: ProofBridge,
    trust: TrustScoreEngine,
    audit: Arc<AuditCoordinator>,
}

impl RelayService {
    /// Open every component over `stores`, restoring persisted state.
    pub fn open(
        config: RelayConfig,
        stores: Stores,
        policy: Arc<dyn PolicyGate>,
        clock: Arc<dyn Clock>,
        coordinator_signer: Option<NodeSigner>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let gate = GuardedPolicyGate::new(policy, config.relay.policy_timeout());

        let directory = Arc::new(FederationDirectory::open(
            stores.nodes.clone(),
            stores.proofs.clone(),
            gate.clone(),
            clock.clone(),
            &config.trust,
            &config.relay,
        )?);
        let bridge = ProofBridge::new(
            directory.clone(),
            gate,
            clock.clone(),
            &config.trust,
            &config.relay,
        );
        let audit = Arc::new(AuditCoordinator::open(
            stores.cycles.clone(),
            stores.proofs.clone(),
            clock,
            &config.audit,
            coordinator_signer,
        )?);

        info!(
            coordinator_id = %config.node.coordinator_id,
            federations = directory.federation_ids().len(),
            "Relay service opened"
        );

        Ok(Self {
            trust: TrustScoreEngine::new(&config.trust),
            config,
            stores,
            directory,
            bridge,
            audit,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<FederationDirectory> {
        &self.directory
    }

    pub fn bridge(&self) -> &ProofBridge {
        &self.bridge
    }

    pub fn audit(&self) -> &Arc<AuditCoordinator> {
        &self.audit
    }

    pub async fn register_node(
        &self,
        node_id: &str,
        federation_id: &str,
        public_key: &[u8],
        stake_amount: u64,
        metadata: BTreeMap<String, String>,
    ) -> Result<String, RegistryError> {
        self.directory
            .register(Registration {
                node_id: node_id.to_string(),
                federation_id: federation_id.to_string(),
                public_key: public_key.to_vec(),
                stake_amount,
                metadata,
            })
            .await
    }

    /// Recompute a node's score from fresh metrics; returns the new score.
    pub fn update_trust_score(
        &self,
        federation_id: &str,
        node_id: &str,
        metrics: &NodeMetrics,
    ) -> Result<u64, TrustError> {
        let federation = self
            .directory
            .get(federation_id)
            .ok_or_else(|| TrustError::NotFound(node_id.to_string()))?;
        let update = self.trust.update(federation.registry(), node_id, metrics)?;
        Ok(update.score)
    }

    pub async fn create_proof(
        &self,
        node_id: &str,
        federation_id: &str,
        payload: Map<String, Value>,
        signer: &NodeSigner,
    ) -> Result<Proof, BridgeError> {
        self.bridge
            .create_proof(node_id, federation_id, payload, signer)
            .await
    }

    pub async fn relay_proof(
        &self,
        proof: &Proof,
        target_federation_id: &str,
    ) -> Result<RelayResult, RelayError> {
        self.bridge.relay(proof, target_federation_id).await
    }

    pub fn trigger_audit_cycle(&self) -> Result<u64, AuditError> {
        self.audit.trigger()
    }

    pub fn store_federation_root(
        &self,
        cycle_number: u64,
        federation_id: &str,
        proofs: &[Proof],
    ) -> Result<Digest, AuditError> {
        self.audit
            .store_federation_root(cycle_number, federation_id, proofs)
    }

    pub fn complete_audit_cycle(
        &self,
        cycle_number: u64,
        expected_total_proofs: u64,
    ) -> Result<Digest, AuditError> {
        self.audit.complete_cycle(cycle_number, expected_total_proofs)
    }

    pub fn verify_digest(
        &self,
        digest: &Digest,
        federation_id: &str,
        cycle_number: u64,
        merkle_path: &[PathStep],
    ) -> bool {
        self.audit
            .verify_digest(digest, federation_id, cycle_number, merkle_path)
    }

    pub fn merkle_path(
        &self,
        cycle_number: u64,
        federation_id: &str,
        digest: &Digest,
    ) -> Result<Option<MerklePath>, AuditError> {
        self.audit.merkle_path(cycle_number, federation_id, digest)
    }

    pub async fn deactivate_node(
        &self,
        federation_id: &str,
        node_id: &str,
    ) -> Result<Node, RegistryError> {
        self.registry(federation_id, node_id)?
            .deactivate(node_id)
            .await
    }

    pub async fn reactivate_node(
        &self,
        federation_id: &str,
        node_id: &str,
    ) -> Result<Node, RegistryError> {
        self.registry(federation_id, node_id)?
            .reactivate(node_id)
            .await
    }

    pub fn lookup_node(&self, federation_id: &str, node_id: &str) -> Result<Node, RegistryError> {
        self.registry(federation_id, node_id)?.lookup(node_id)
    }

    fn registry(
        &self,
        federation_id: &str,
        node_id: &str,
    ) -> Result<Arc<fedrelay_trust_mesh::NodeRegistry>, RegistryError> {
        self.directory
            .get(federation_id)
            .map(|f| f.registry().clone())
            .ok_or_else(|| RegistryError::NotFound(node_id.to_string()))
    }

    /// Start the trust updater, replay eviction and audit scheduler.
    pub fn spawn_background(
        &self,
        metrics: Arc<dyn MetricsSource>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let updater = Arc::new(TrustUpdater::new(
            self.trust.clone(),
            self.directory.clone(),
            metrics,
            self.config.trust.update_interval(),
        ));
        let scheduler = Arc::new(AuditScheduler::new(
            self.audit.clone(),
            self.stores.proofs.clone(),
            self.config.audit.poll_interval(),
        ));

        vec![
            updater.spawn(shutdown.clone()),
            self.directory
                .clone()
                .spawn_eviction(self.config.relay.eviction_interval(), shutdown.clone()),
            scheduler.spawn(shutdown),
        ]
    }
}

impl std::fmt::Debug for RelayService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayService")
            .field("directory", &self.directory)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}
