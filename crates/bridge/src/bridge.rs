//! Proof Bridge
//!
//! Creates signed proofs at their home federation and relays them to other
//! federations. Proof creation lives in `proof.rs`, the relay protocol in
//! `relay.rs`; both are methods on [`ProofBridge`].

use crate::directory::FederationDirectory;
use fedrelay_core::config::{RelaySection, TrustSection};
use fedrelay_core::event::EventBuilder;
use fedrelay_core::{Clock, Event};
use fedrelay_trust_mesh::GuardedPolicyGate;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct ProofBridge {
    pub(crate) directory: Arc<FederationDirectory>,
    pub(crate) policy: GuardedPolicyGate,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) payload_allow_list: Vec<String>,
    pub(crate) relay_min_trust: u64,
    events: broadcast::Sender<Event>,
}

impl ProofBridge {
    pub fn new(
        directory: Arc<FederationDirectory>,
        policy: GuardedPolicyGate,
        clock: Arc<dyn Clock>,
        trust: &TrustSection,
        relay: &RelaySection,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            directory,
            policy,
            clock,
            payload_allow_list: relay.payload_allow_list.clone(),
            relay_min_trust: trust.relay_min_trust,
            events,
        }
    }

    pub fn directory(&self) -> &Arc<FederationDirectory> {
        &self.directory
    }

    pub fn relay_min_trust(&self) -> u64 {
        self.relay_min_trust
    }

    /// Relay and security events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: Event) {
        let _ = self.events.send(event);
    }

    pub(crate) fn event(&self, event_type: &str) -> EventBuilder {
        EventBuilder::new(event_type, "proof-bridge").timestamp(self.clock.now_ms())
    }
}

impl std::fmt::Debug for ProofBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofBridge")
            .field("directory", &self.directory)
            .field("relay_min_trust", &self.relay_min_trust)
            .finish_non_exhaustive()
    }
}
