//! Audit Cycle Coordinator
//!
//! Cycles move `Collecting -> Sealed` and the coordinator as a whole is
//! `Idle` whenever its latest cycle is sealed. A new cycle opens once the
//! cycle interval has elapsed since the latest sealed cycle started.
//!
//! Concurrency:
//! - the latest cycle number is an `AtomicU64`; opening a cycle is a
//!   compare-and-swap on it, so two drivers can never open the same cycle
//! - every cycle sits behind its own mutex; federation submissions build
//!   their Merkle tree before taking it and only insert under it
//! - a cycle becomes visible in its new state only after the store accepted it
//!
//! A cycle is never sealed while a federation that recorded proofs in the
//! cycle's window has not submitted its root.

use fedrelay_core::event::{event_types, EventBuilder, EventCategory, EventSeverity};
use fedrelay_core::{
    AuditCycle, AuditSection, Clock, CycleStore, Digest, Event, FederationRoot, Proof,
    ProofStore, StoreError,
};
use fedrelay_crypto::{
    global_root, verify_digest_signature, verify_path, MerkleError, MerklePath, MerkleTree,
    NodeSigner, PathStep,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit cycle {0} not found")]
    CycleNotFound(u64),

    #[error("Audit cycle {0} is already sealed")]
    CycleAlreadySealed(u64),

    #[error("Federation {federation_id} already submitted a root for cycle {cycle_number}")]
    RootAlreadySubmitted {
        cycle_number: u64,
        federation_id: String,
    },

    #[error("Empty submission from federation {0}")]
    EmptySubmission(String),

    #[error("Duplicate proof id in submission: {0}")]
    DuplicateProof(String),

    #[error("Proof count mismatch for cycle {cycle_number}: expected {expected}, submitted {actual}")]
    ProofCountMismatch {
        cycle_number: u64,
        expected: u64,
        actual: u64,
    },

    #[error("Cycle {cycle_number} has unsubmitted federations: {federations:?}")]
    PendingFederations {
        cycle_number: u64,
        federations: Vec<String>,
    },

    #[error("Merkle error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Coordinator lock poisoned")]
    LockPoisoned,
}

impl From<StoreError> for AuditError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SealedCycle(n) => AuditError::CycleAlreadySealed(n),
            other => AuditError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;

/// Lifecycle position of the coordinator or of a single cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    Idle,
    Collecting,
    Sealed,
}

pub struct AuditCoordinator {
    store: Arc<dyn CycleStore>,
    proofs: Arc<dyn ProofStore>,
    clock: Arc<dyn Clock>,
    cycle_interval_ms: u64,
    signer: Option<NodeSigner>,
    cycles: RwLock<BTreeMap<u64, Arc<Mutex<AuditCycle>>>>,
    latest: AtomicU64,
    events: broadcast::Sender<Event>,
}

impl AuditCoordinator {
    /// Restore cycles from `store`, or seal an empty genesis cycle 0.
    ///
    /// With a `signer`, every seal carries its Ed25519 signature over the
    /// global root. `proofs` is consulted before sealing to find federations
    /// that still owe a root.
    pub fn open(
        store: Arc<dyn CycleStore>,
        proofs: Arc<dyn ProofStore>,
        clock: Arc<dyn Clock>,
        config: &AuditSection,
        signer: Option<NodeSigner>,
    ) -> Result<Self> {
        let mut restored = store.load_cycles()?;

        if restored.is_empty() {
            let now = clock.now_ms();
            let mut genesis = AuditCycle::open(0, now);
            seal(&mut genesis, now, signer.as_ref());
            store.save_cycle(&genesis)?;
            info!(started_at = now, "Genesis audit cycle sealed");
            restored.push(genesis);
        }

        let latest = restored.iter().map(|c| c.cycle_number).max().unwrap_or(0);
        let cycles = restored
            .into_iter()
            .map(|c| (c.cycle_number, Arc::new(Mutex::new(c))))
            .collect::<BTreeMap<_, _>>();

        info!(cycles = cycles.len(), latest, "Audit coordinator opened");

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            store,
            proofs,
            clock,
            cycle_interval_ms: config.cycle_interval().as_millis() as u64,
            signer,
            cycles: RwLock::new(cycles),
            latest: AtomicU64::new(latest),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Public key that seal signatures verify against
    pub fn seal_public_key(&self) -> Option<[u8; 32]> {
        self.signer.as_ref().map(|s| s.public_key())
    }

    fn publish(&self, event: Event) {
        let _ = self.events.send(event);
    }

    fn entry(&self, cycle_number: u64) -> Result<Arc<Mutex<AuditCycle>>> {
        let cycles = self.cycles.read().map_err(|_| AuditError::LockPoisoned)?;
        cycles
            .get(&cycle_number)
            .cloned()
            .ok_or(AuditError::CycleNotFound(cycle_number))
    }

    /// Number of the latest opened cycle
    pub fn latest_cycle_number(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    /// `[previous.started_at, started_at)` of `cycle_number`, the span of
    /// store-side record times the cycle covers
    pub fn collection_window(&self, cycle_number: u64) -> Result<(u64, u64)> {
        let previous = cycle_number
            .checked_sub(1)
            .ok_or(AuditError::CycleNotFound(cycle_number))?;
        let from = self
            .cycle(previous)?
            .ok_or(AuditError::CycleNotFound(previous))?
            .started_at;
        let to = self
            .cycle(cycle_number)?
            .ok_or(AuditError::CycleNotFound(cycle_number))?
            .started_at;
        Ok((from, to))
    }

    /// Federations with proofs in the window of `cycle` and no stored root
    fn pending_federations(&self, cycle: &AuditCycle, from: u64, to: u64) -> Result<Vec<String>> {
        let mut pending = Vec::new();
        for federation_id in self.proofs.federations_with_proofs()? {
            if cycle.federation_merkle_roots.contains_key(&federation_id) {
                continue;
            }
            if !self
                .proofs
                .proofs_recorded_between(&federation_id, from, to)?
                .is_empty()
            {
                pending.push(federation_id);
            }
        }
        Ok(pending)
    }

    fn refuse_seal(&self, cycle_number: u64, err: AuditError) -> AuditError {
        warn!(cycle_number, error = %err, "Seal refused, cycle stays open");
        self.publish(
            EventBuilder::new(event_types::CYCLE_SEAL_REFUSED, "audit-coordinator")
                .category(EventCategory::Audit)
                .severity(EventSeverity::Error)
                .timestamp(self.clock.now_ms())
                .message(err.to_string())
                .metadata("cycle_number", cycle_number)
                .build(),
        );
        err
    }

    /// Open the next cycle if the interval has elapsed since the latest
    /// sealed cycle started; returns the current cycle number either way.
    pub fn trigger(&self) -> Result<u64> {
        let current = self.latest_cycle_number();
        let (completed, started_at) = {
            let entry = match self.entry(current) {
                Ok(entry) => entry,
                // Opened by another driver, not yet visible
                Err(AuditError::CycleNotFound(_)) => return Ok(current),
                Err(e) => return Err(e),
            };
            let cycle = entry.lock().map_err(|_| AuditError::LockPoisoned)?;
            (cycle.completed, cycle.started_at)
        };

        let now = self.clock.now_ms();
        if !completed || now.saturating_sub(started_at) < self.cycle_interval_ms {
            debug!(cycle_number = current, completed, "Audit trigger is a no-op");
            return Ok(current);
        }

        let next = current + 1;
        if self
            .latest
            .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Another driver opened it first
            return Ok(self.latest_cycle_number());
        }

        let cycle = AuditCycle::open(next, now);
        if let Err(e) = self.store.save_cycle(&cycle) {
            self.latest.store(current, Ordering::SeqCst);
            return Err(e.into());
        }
        {
            let mut cycles = self.cycles.write().map_err(|_| AuditError::LockPoisoned)?;
            cycles.insert(next, Arc::new(Mutex::new(cycle)));
        }

        info!(cycle_number = next, started_at = now, "Audit cycle started");
        self.publish(
            EventBuilder::new(event_types::CYCLE_STARTED, "audit-coordinator")
                .category(EventCategory::Audit)
                .timestamp(now)
                .message(format!("cycle {} collecting", next))
                .metadata("cycle_number", next)
                .build(),
        );
        Ok(next)
    }

    /// Submit a federation's proofs for `cycle_number`; returns its root.
    ///
    /// Leaves are the proof digests ordered by proof id.
    pub fn store_federation_root(
        &self,
        cycle_number: u64,
        federation_id: &str,
        proofs: &[Proof],
    ) -> Result<Digest> {
        let leaves = proofs
            .iter()
            .map(|p| (p.proof_id.clone(), p.digest))
            .collect();
        self.store_federation_leaves(cycle_number, federation_id, leaves)
    }

    /// Same as [`store_federation_root`](Self::store_federation_root) for
    /// bare `(proof_id, digest)` pairs.
    pub fn store_federation_leaves(
        &self,
        cycle_number: u64,
        federation_id: &str,
        mut leaves: Vec<(String, Digest)>,
    ) -> Result<Digest> {
        if leaves.is_empty() {
            return Err(AuditError::EmptySubmission(federation_id.to_string()));
        }
        leaves.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(pair) = leaves.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(AuditError::DuplicateProof(pair[0].0.clone()));
        }

        let digests: Vec<Digest> = leaves.into_iter().map(|(_, d)| d).collect();
        let tree = MerkleTree::build(&digests)?;
        let root = tree.root();

        let entry = self.entry(cycle_number)?;
        let mut cycle = entry.lock().map_err(|_| AuditError::LockPoisoned)?;
        if cycle.completed {
            return Err(AuditError::CycleAlreadySealed(cycle_number));
        }
        if cycle.federation_merkle_roots.contains_key(federation_id) {
            return Err(AuditError::RootAlreadySubmitted {
                cycle_number,
                federation_id: federation_id.to_string(),
            });
        }

        let mut next = cycle.clone();
        next.federation_merkle_roots.insert(
            federation_id.to_string(),
            FederationRoot {
                root,
                leaf_count: digests.len() as u64,
                leaves: digests,
            },
        );
        self.store.save_cycle(&next)?;
        *cycle = next;

        info!(
            cycle_number,
            federation_id = %federation_id,
            leaves = tree.leaf_count(),
            root = %hex_digest(&root),
            "Federation root stored"
        );
        Ok(root)
    }

    /// Seal `cycle_number` if every federation that recorded proofs in its
    /// window has submitted a root and `expected_total_proofs` matches the
    /// submitted leaves; returns the global root.
    ///
    /// Otherwise the cycle keeps collecting.
    pub fn complete_cycle(&self, cycle_number: u64, expected_total_proofs: u64) -> Result<Digest> {
        let entry = self.entry(cycle_number)?;
        if entry.lock().map_err(|_| AuditError::LockPoisoned)?.completed {
            return Err(AuditError::CycleAlreadySealed(cycle_number));
        }
        let (from, to) = self.collection_window(cycle_number)?;

        let mut cycle = entry.lock().map_err(|_| AuditError::LockPoisoned)?;
        if cycle.completed {
            return Err(AuditError::CycleAlreadySealed(cycle_number));
        }

        let pending = self.pending_federations(&cycle, from, to)?;
        if !pending.is_empty() {
            return Err(self.refuse_seal(
                cycle_number,
                AuditError::PendingFederations {
                    cycle_number,
                    federations: pending,
                },
            ));
        }

        let actual = cycle.submitted_leaf_count();
        if actual != expected_total_proofs {
            return Err(self.refuse_seal(
                cycle_number,
                AuditError::ProofCountMismatch {
                    cycle_number,
                    expected: expected_total_proofs,
                    actual,
                },
            ));
        }

        let now = self.clock.now_ms();
        let mut next = cycle.clone();
        let root = seal(&mut next, now, self.signer.as_ref());
        self.store.save_cycle(&next)?;
        *cycle = next;

        info!(
            cycle_number,
            federations = cycle.federation_merkle_roots.len(),
            total_proofs = actual,
            global_root = %hex_digest(&root),
            "Audit cycle sealed"
        );
        self.publish(
            EventBuilder::new(event_types::CYCLE_SEALED, "audit-coordinator")
                .category(EventCategory::Audit)
                .severity(EventSeverity::Info)
                .timestamp(now)
                .message(format!("cycle {} sealed", cycle_number))
                .metadata("cycle_number", cycle_number)
                .metadata("total_proofs", actual)
                .metadata("global_root", hex_digest(&root))
                .build(),
        );
        Ok(root)
    }

    /// True iff walking `merkle_path` up from `digest` reproduces the sealed
    /// root of `federation_id` in `cycle_number`.
    pub fn verify_digest(
        &self,
        digest: &Digest,
        federation_id: &str,
        cycle_number: u64,
        merkle_path: &[PathStep],
    ) -> bool {
        let Ok(entry) = self.entry(cycle_number) else {
            return false;
        };
        let Ok(cycle) = entry.lock() else {
            return false;
        };
        if !cycle.completed {
            return false;
        }
        cycle
            .federation_merkle_roots
            .get(federation_id)
            .map(|r| verify_path(digest, merkle_path, &r.root))
            .unwrap_or(false)
    }

    /// Inclusion path of `digest` in a federation's tree, if it is a leaf
    pub fn merkle_path(
        &self,
        cycle_number: u64,
        federation_id: &str,
        digest: &Digest,
    ) -> Result<Option<MerklePath>> {
        let leaves = {
            let entry = self.entry(cycle_number)?;
            let cycle = entry.lock().map_err(|_| AuditError::LockPoisoned)?;
            match cycle.federation_merkle_roots.get(federation_id) {
                Some(root) => root.leaves.clone(),
                None => return Ok(None),
            }
        };

        let tree = MerkleTree::build(&leaves)?;
        match tree.position(digest) {
            Some(index) => Ok(Some(tree.path(index)?)),
            None => Ok(None),
        }
    }

    /// Check a sealed cycle's signature against `public_key`
    pub fn verify_seal(&self, cycle_number: u64, public_key: &[u8; 32]) -> bool {
        match self.cycle(cycle_number) {
            Ok(Some(cycle)) => match (cycle.global_root, cycle.seal_signature) {
                (Some(root), Some(signature)) => {
                    verify_digest_signature(public_key, &root, &signature).is_ok()
                }
                _ => false,
            },
            _ => false,
        }
    }

    pub fn cycle(&self, cycle_number: u64) -> Result<Option<AuditCycle>> {
        let cycles = self.cycles.read().map_err(|_| AuditError::LockPoisoned)?;
        match cycles.get(&cycle_number) {
            Some(entry) => {
                let cycle = entry.lock().map_err(|_| AuditError::LockPoisoned)?;
                Ok(Some(cycle.clone()))
            }
            None => Ok(None),
        }
    }

    /// Latest cycle visible in the coordinator
    pub fn current_cycle(&self) -> Result<AuditCycle> {
        let entry = {
            let cycles = self.cycles.read().map_err(|_| AuditError::LockPoisoned)?;
            cycles
                .values()
                .next_back()
                .cloned()
                .ok_or(AuditError::CycleNotFound(self.latest_cycle_number()))?
        };
        let cycle = entry.lock().map_err(|_| AuditError::LockPoisoned)?;
        Ok(cycle.clone())
    }

    pub fn cycle_state(&self, cycle_number: u64) -> Result<CycleState> {
        match self.cycle(cycle_number)? {
            Some(c) if c.completed => Ok(CycleState::Sealed),
            Some(_) => Ok(CycleState::Collecting),
            None => Err(AuditError::CycleNotFound(cycle_number)),
        }
    }

    /// `Idle` while the latest cycle is sealed, `Collecting` otherwise
    pub fn state(&self) -> Result<CycleState> {
        let cycle = self.current_cycle()?;
        Ok(if cycle.completed {
            CycleState::Idle
        } else {
            CycleState::Collecting
        })
    }
}

impl std::fmt::Debug for AuditCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditCoordinator")
            .field("latest", &self.latest_cycle_number())
            .field("cycle_interval_ms", &self.cycle_interval_ms)
            .finish_non_exhaustive()
    }
}

/// Derive the global root and freeze `cycle`
fn seal(cycle: &mut AuditCycle, now: u64, signer: Option<&NodeSigner>) -> Digest {
    let root = global_root(
        cycle
            .federation_merkle_roots
            .iter()
            .map(|(id, r)| (id.as_str(), &r.root)),
    );
    cycle.global_root = Some(root);
    cycle.total_proofs = cycle.submitted_leaf_count();
    cycle.completed = true;
    cycle.sealed_at = Some(now);
    cycle.seal_signature = signer.map(|s| s.sign_digest(&root));
    root
}

fn hex_digest(digest: &Digest) -> String {
    hex::encode(digest)
}
