//! Node Registry
//!
//! One registry per federation. Nodes are held as `Arc<Mutex<Node>>` inside a
//! read-mostly index, so:
//! - lookups take the index read lock and then the node's own lock
//! - mutations of different nodes never contend
//! - mutations of the same node serialize on that node's lock, and the new
//!   state becomes visible only after the store accepted it
//!
//! Nodes are never deleted. Administrative deactivation is a status
//! transition that also sets `administratively_suspended`.

use crate::policy::{GuardedPolicyGate, PolicyAction, PolicyContext};
use fedrelay_core::event::{event_types, EventBuilder, EventCategory, EventSeverity};
use fedrelay_core::{Clock, Event, Node, NodeStatus, NodeStore, StoreError, MIN_TRUST_SCORE};
use fedrelay_crypto::parse_public_key;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Node already registered: {0}")]
    DuplicateNode(String),

    #[error("Invalid public key: {0}")]
    InvalidKey(String),

    #[error("Rejected by policy: {}", .0.join("; "))]
    PolicyRejected(Vec<String>),

    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Registry serves federation {expected}, got {actual}")]
    FederationMismatch { expected: String, actual: String },

    #[error("Node {node_id} trust score {score} is below threshold {threshold}")]
    TrustBelowThreshold {
        node_id: String,
        score: u64,
        threshold: u64,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Registry lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registration request
#[derive(Debug, Clone)]
pub struct Registration {
    pub node_id: String,
    pub federation_id: String,
    pub public_key: Vec<u8>,
    pub stake_amount: u64,
    pub metadata: BTreeMap<String, String>,
}

pub struct NodeRegistry {
    federation_id: String,
    nodes: RwLock<IndexMap<String, Arc<Mutex<Node>>>>,
    store: Arc<dyn NodeStore>,
    policy: GuardedPolicyGate,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<Event>,
    min_trust_score: u64,
}

impl NodeRegistry {
    /// Open the registry of `federation_id`, restoring its nodes from `store`.
    pub fn open(
        federation_id: impl Into<String>,
        store: Arc<dyn NodeStore>,
        policy: GuardedPolicyGate,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let federation_id = federation_id.into();
        let restored = store.load_nodes(&federation_id)?;

        info!(
            federation_id = %federation_id,
            nodes = restored.len(),
            "Opening node registry"
        );

        let nodes = restored
            .into_iter()
            .map(|n| (n.node_id.clone(), Arc::new(Mutex::new(n))))
            .collect();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            federation_id,
            nodes: RwLock::new(nodes),
            store,
            policy,
            clock,
            events,
            min_trust_score: MIN_TRUST_SCORE,
        })
    }

    /// Override the activity threshold (inclusive)
    pub fn with_min_trust_score(mut self, min_trust_score: u64) -> Self {
        self.min_trust_score = min_trust_score;
        self
    }

    pub fn federation_id(&self) -> &str {
        &self.federation_id
    }

    pub fn min_trust_score(&self) -> u64 {
        self.min_trust_score
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: Event) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    pub(crate) fn event(&self, event_type: &str, node_id: &str) -> EventBuilder {
        EventBuilder::new(event_type, "node-registry")
            .node(self.federation_id.clone(), node_id)
            .timestamp(self.clock.now_ms())
    }

    fn entry(&self, node_id: &str) -> Result<Arc<Mutex<Node>>> {
        let nodes = self.nodes.read().map_err(|_| RegistryError::LockPoisoned)?;
        nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(node_id.to_string()))
    }

    /// Register a new node with maximal trust.
    pub async fn register(&self, registration: Registration) -> Result<String> {
        let Registration {
            node_id,
            federation_id,
            public_key,
            stake_amount,
            metadata,
        } = registration;

        if federation_id != self.federation_id {
            return Err(RegistryError::FederationMismatch {
                expected: self.federation_id.clone(),
                actual: federation_id,
            });
        }

        if self.contains(&node_id)? {
            return Err(RegistryError::DuplicateNode(node_id));
        }

        let public_key =
            screen_registration(&self.policy, &federation_id, &node_id, &public_key, &metadata)
                .await?;

        let node = Node::registered(
            node_id.clone(),
            self.federation_id.clone(),
            public_key,
            stake_amount,
            metadata,
            self.clock.now_ms(),
        );

        // The store's unique key settles concurrent registrations of one id
        match self.store.insert_node(&node) {
            Ok(()) => {}
            Err(StoreError::DuplicateKey(_)) => return Err(RegistryError::DuplicateNode(node_id)),
            Err(e) => return Err(e.into()),
        }

        {
            let mut nodes = self.nodes.write().map_err(|_| RegistryError::LockPoisoned)?;
            nodes.insert(node_id.clone(), Arc::new(Mutex::new(node)));
        }

        info!(
            federation_id = %self.federation_id,
            node_id = %node_id,
            stake_amount,
            "Node registered"
        );
        self.publish(
            self.event(event_types::NODE_REGISTERED, &node_id)
                .category(EventCategory::Registry)
                .message("node registered")
                .metadata("stake_amount", stake_amount)
                .build(),
        );

        Ok(node_id)
    }

    pub fn contains(&self, node_id: &str) -> Result<bool> {
        let nodes = self.nodes.read().map_err(|_| RegistryError::LockPoisoned)?;
        Ok(nodes.contains_key(node_id))
    }

    /// Current state of a node
    pub fn lookup(&self, node_id: &str) -> Result<Node> {
        let entry = self.entry(node_id)?;
        let node = entry.lock().map_err(|_| RegistryError::LockPoisoned)?;
        Ok(node.clone())
    }

    /// All nodes in registration order
    pub fn list_nodes(&self) -> Result<Vec<Node>> {
        let entries: Vec<Arc<Mutex<Node>>> = {
            let nodes = self.nodes.read().map_err(|_| RegistryError::LockPoisoned)?;
            nodes.values().cloned().collect()
        };

        entries
            .iter()
            .map(|e| {
                e.lock()
                    .map(|n| n.clone())
                    .map_err(|_| RegistryError::LockPoisoned)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().map(|n| n.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `mutate` to a node as one critical section.
    ///
    /// The mutation runs on a copy; the copy is persisted and only then
    /// replaces the in-memory node. Returns the new state and whatever
    /// `mutate` returned.
    pub(crate) fn update_with<R, F>(&self, node_id: &str, mutate: F) -> Result<(Node, R)>
    where
        F: FnOnce(&mut Node) -> Result<R>,
    {
        let entry = self.entry(node_id)?;
        let mut guard = entry.lock().map_err(|_| RegistryError::LockPoisoned)?;

        let mut next = guard.clone();
        let out = mutate(&mut next)?;
        self.store.update_node(&next)?;
        *guard = next.clone();

        Ok((next, out))
    }

    /// Administratively deactivate a node.
    pub async fn deactivate(&self, node_id: &str) -> Result<Node> {
        self.entry(node_id)?;
        self.authorize(PolicyAction::DeactivateNode, node_id).await?;

        let now = self.clock.now_ms();
        let (node, previous) = self.update_with(node_id, |node| {
            let previous = node.status;
            node.administratively_suspended = true;
            node.status = NodeStatus::Inactive;
            node.last_updated = now;
            Ok(previous)
        })?;

        info!(
            federation_id = %self.federation_id,
            node_id = %node_id,
            previous_status = %previous,
            "Node administratively deactivated"
        );
        self.publish(
            self.event(event_types::NODE_DEACTIVATED, node_id)
                .category(EventCategory::Registry)
                .severity(EventSeverity::Warning)
                .message("administrative deactivation")
                .metadata("trust_score", node.trust_score)
                .build(),
        );

        Ok(node)
    }

    /// Lift an administrative deactivation; requires the activity threshold.
    pub async fn reactivate(&self, node_id: &str) -> Result<Node> {
        self.entry(node_id)?;
        self.authorize(PolicyAction::ReactivateNode, node_id).await?;

        let now = self.clock.now_ms();
        let threshold = self.min_trust_score;
        let (node, ()) = self.update_with(node_id, |node| {
            if node.trust_score < threshold {
                return Err(RegistryError::TrustBelowThreshold {
                    node_id: node.node_id.clone(),
                    score: node.trust_score,
                    threshold,
                });
            }
            node.administratively_suspended = false;
            node.status = NodeStatus::Active;
            node.last_updated = now;
            Ok(())
        })?;

        info!(
            federation_id = %self.federation_id,
            node_id = %node_id,
            trust_score = node.trust_score,
            "Node reactivated"
        );
        self.publish(
            self.event(event_types::NODE_REACTIVATED, node_id)
                .category(EventCategory::Registry)
                .message("administrative reactivation")
                .metadata("trust_score", node.trust_score)
                .build(),
        );

        Ok(node)
    }

    async fn authorize(&self, action: PolicyAction, node_id: &str) -> Result<()> {
        let decision = self
            .policy
            .decide(
                action,
                &PolicyContext::administrative(&self.federation_id, node_id),
            )
            .await;
        if decision.is_allowed() {
            debug!(federation_id = %self.federation_id, node_id = %node_id, %action, "Policy allowed");
            Ok(())
        } else {
            warn!(
                federation_id = %self.federation_id,
                node_id = %node_id,
                %action,
                reasons = ?decision.deny_reasons,
                "Administrative action rejected by policy"
            );
            Err(RegistryError::PolicyRejected(decision.deny_reasons))
        }
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("federation_id", &self.federation_id)
            .field("nodes", &self.len())
            .finish_non_exhaustive()
    }
}

/// Key and policy checks of a registration that do not depend on registry
/// state; returns the parsed public key.
pub async fn screen_registration(
    policy: &GuardedPolicyGate,
    federation_id: &str,
    node_id: &str,
    public_key: &[u8],
    metadata: &BTreeMap<String, String>,
) -> Result<[u8; 32]> {
    let verifying_key =
        parse_public_key(public_key).map_err(|e| RegistryError::InvalidKey(e.to_string()))?;

    let decision = policy
        .decide(
            PolicyAction::RegisterNode,
            &PolicyContext::registration(federation_id, node_id, metadata.clone()),
        )
        .await;
    if !decision.is_allowed() {
        warn!(
            federation_id = %federation_id,
            node_id = %node_id,
            reasons = ?decision.deny_reasons,
            "Registration rejected by policy"
        );
        return Err(RegistryError::PolicyRejected(decision.deny_reasons));
    }

    Ok(verifying_key.to_bytes())
}
