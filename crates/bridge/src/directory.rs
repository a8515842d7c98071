//! Federation directory
//!
//! Maps federation ids to their registry, proof store view and replay cache.
//! Federations are kept in the order they were first seen and are created on
//! first registration. On open the directory restores every federation that
//! has either nodes or proofs in the stores.

use crate::replay::ReplayCache;
use fedrelay_core::config::{RelaySection, TrustSection};
use fedrelay_core::{Clock, NodeStore, Proof, ProofStore, StoreError};
use fedrelay_trust_mesh::{
    screen_registration, GuardedPolicyGate, NodeRegistry, Registration, RegistryError,
    RegistryProvider,
};
use indexmap::IndexMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One federation as seen by the relay
pub struct Federation {
    id: String,
    registry: Arc<NodeRegistry>,
    proofs: Arc<dyn ProofStore>,
    replay: Arc<ReplayCache>,
}

impl Federation {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn replay(&self) -> &Arc<ReplayCache> {
        &self.replay
    }

    /// Append a proof record to this federation's store
    pub fn append_proof(&self, proof: &Proof, recorded_at: u64) -> Result<bool, StoreError> {
        self.proofs.append_proof(proof, recorded_at)
    }

    pub fn get_proof(&self, proof_id: &str) -> Result<Option<Proof>, StoreError> {
        self.proofs.get_proof(&self.id, proof_id)
    }

    pub fn proofs_recorded_between(&self, from_ms: u64, to_ms: u64) -> Result<Vec<Proof>, StoreError> {
        self.proofs.proofs_recorded_between(&self.id, from_ms, to_ms)
    }

    pub fn proof_count(&self) -> Result<u64, StoreError> {
        self.proofs.proof_count(&self.id)
    }
}

impl std::fmt::Debug for Federation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Federation")
            .field("id", &self.id)
            .field("nodes", &self.registry.len())
            .field("nonces", &self.replay.len())
            .finish()
    }
}

pub struct FederationDirectory {
    federations: RwLock<IndexMap<String, Arc<Federation>>>,
    node_store: Arc<dyn NodeStore>,
    proof_store: Arc<dyn ProofStore>,
    policy: GuardedPolicyGate,
    clock: Arc<dyn Clock>,
    min_trust_score: u64,
    relay: RelaySection,
}

impl FederationDirectory {
    /// Open the directory and restore every known federation.
    pub fn open(
        node_store: Arc<dyn NodeStore>,
        proof_store: Arc<dyn ProofStore>,
        policy: GuardedPolicyGate,
        clock: Arc<dyn Clock>,
        trust: &TrustSection,
        relay: &RelaySection,
    ) -> Result<Self, RegistryError> {
        let directory = Self {
            federations: RwLock::new(IndexMap::new()),
            node_store,
            proof_store,
            policy,
            clock,
            min_trust_score: trust.min_trust_score,
            relay: relay.clone(),
        };

        let mut ids = directory.node_store.federations()?;
        for id in directory.proof_store.federations_with_proofs()? {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        for id in &ids {
            let federation = directory.get_or_create(id)?;
            directory.warm_replay_cache(&federation)?;
        }

        info!(federations = ids.len(), "Federation directory opened");
        Ok(directory)
    }

    /// Re-insert nonces of proofs relayed into `federation` within the window
    fn warm_replay_cache(&self, federation: &Federation) -> Result<(), RegistryError> {
        let now = self.clock.now_ms();
        let window_ms = self.relay.replay_window().as_millis() as u64;
        let since = now.saturating_sub(window_ms);

        let relayed_in = federation
            .proofs_recorded_between(since, u64::MAX)?
            .into_iter()
            .filter(|p| p.origin_federation_id != federation.id);

        let mut restored = 0usize;
        for proof in relayed_in {
            if federation.replay.insert_if_absent(&proof.nonce, proof.timestamp).is_ok() {
                restored += 1;
            }
        }

        if restored > 0 {
            debug!(federation_id = %federation.id, restored, "Replay cache restored");
        }
        Ok(())
    }

    pub fn get(&self, federation_id: &str) -> Option<Arc<Federation>> {
        self.federations
            .read()
            .ok()
            .and_then(|f| f.get(federation_id).cloned())
    }

    pub fn contains(&self, federation_id: &str) -> bool {
        self.get(federation_id).is_some()
    }

    /// Federation handle, created (with an empty registry) if unknown
    pub fn get_or_create(&self, federation_id: &str) -> Result<Arc<Federation>, RegistryError> {
        if let Some(federation) = self.get(federation_id) {
            return Ok(federation);
        }

        let mut federations = self
            .federations
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?;
        if let Some(federation) = federations.get(federation_id) {
            return Ok(federation.clone());
        }

        let registry = NodeRegistry::open(
            federation_id,
            self.node_store.clone(),
            self.policy.clone(),
            self.clock.clone(),
        )?
        .with_min_trust_score(self.min_trust_score);

        let federation = Arc::new(Federation {
            id: federation_id.to_string(),
            registry: Arc::new(registry),
            proofs: self.proof_store.clone(),
            replay: Arc::new(ReplayCache::new(
                self.relay.replay_capacity,
                self.relay.replay_window(),
                self.relay.max_clock_skew(),
            )),
        });
        federations.insert(federation_id.to_string(), federation.clone());

        info!(federation_id = %federation_id, "Federation added");
        Ok(federation)
    }

    /// Register a node, creating its federation only once the registration
    /// has passed the key and policy checks.
    pub async fn register(&self, registration: Registration) -> Result<String, RegistryError> {
        if let Some(federation) = self.get(&registration.federation_id) {
            return federation.registry.register(registration).await;
        }

        screen_registration(
            &self.policy,
            &registration.federation_id,
            &registration.node_id,
            &registration.public_key,
            &registration.metadata,
        )
        .await?;
        let federation = self.get_or_create(&registration.federation_id)?;
        federation.registry.register(registration).await
    }

    /// Federation ids in the order they were first seen
    pub fn federation_ids(&self) -> Vec<String> {
        self.federations
            .read()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn federations(&self) -> Vec<Arc<Federation>> {
        self.federations
            .read()
            .map(|f| f.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Evict expired nonces from every replay cache
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now_ms();
        self.federations()
            .iter()
            .map(|f| f.replay.evict_expired(now))
            .sum()
    }

    /// Run `evict_expired` every `interval` until `shutdown` turns true.
    pub fn spawn_eviction(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Replay eviction started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = self.evict_expired();
                        if evicted > 0 {
                            debug!(evicted, "Expired nonces evicted");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Replay eviction stopped");
        })
    }
}

impl RegistryProvider for FederationDirectory {
    fn registries(&self) -> Vec<Arc<NodeRegistry>> {
        self.federations()
            .into_iter()
            .map(|f| f.registry.clone())
            .collect()
    }
}

impl std::fmt::Debug for FederationDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationDirectory")
            .field("federations", &self.federation_ids())
            .finish_non_exhaustive()
    }
}
