//! Event schema for observable side effects in FedRelay.
//!
//! Registry transitions, trust decisions and relay rejections are emitted as
//! `Event` values. Consumers (monitoring, audit export) subscribe to them; the
//! relay core never depends on anyone listening.

use crate::clock::{Clock, SystemClock};
use serde::{Deserialize, Serialize};

/// Severity level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Category of event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventCategory {
    /// Node registration and administrative transitions
    Registry,
    /// Trust score changes
    Trust,
    /// Signature, replay and policy rejections
    Security,
    /// Proof relay between federations
    Relay,
    /// Audit cycle lifecycle
    Audit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    /// Unix epoch milliseconds
    pub timestamp: u64,
    pub severity: EventSeverity,
    pub category: EventCategory,
    /// Specific action or state, see [`event_types`]
    pub event_type: String,
    /// Node the event concerns (if applicable)
    pub node_id: Option<String>,
    pub federation_id: Option<String>,
    /// Emitting component
    pub source: String,
    pub message: String,
    pub metadata: EventMetadata,
}

/// Structured metadata for events.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventMetadata {
    #[serde(flatten)]
    pub data: std::collections::HashMap<String, serde_json::Value>,
}

impl EventMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

/// Builder for creating events.
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event: Event {
                event_id: uuid::Uuid::new_v4().to_string(),
                timestamp: SystemClock.now_ms(),
                severity: EventSeverity::Info,
                category: EventCategory::Registry,
                event_type: event_type.into(),
                node_id: None,
                federation_id: None,
                source: source.into(),
                message: String::new(),
                metadata: EventMetadata::new(),
            },
        }
    }

    pub fn severity(mut self, severity: EventSeverity) -> Self {
        self.event.severity = severity;
        self
    }

    pub fn category(mut self, category: EventCategory) -> Self {
        self.event.category = category;
        self
    }

    pub fn node(mut self, federation_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        self.event.federation_id = Some(federation_id.into());
        self.event.node_id = Some(node_id.into());
        self
    }

    pub fn federation(mut self, federation_id: impl Into<String>) -> Self {
        self.event.federation_id = Some(federation_id.into());
        self
    }

    /// Override the timestamp (injected clocks)
    pub fn timestamp(mut self, timestamp_ms: u64) -> Self {
        self.event.timestamp = timestamp_ms;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.event.message = message.into();
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.event.metadata.insert(key, value);
        self
    }

    pub fn build(self) -> Event {
        self.event
    }
}

/// Standard event types.
pub mod event_types {
    // Registry events
    pub const NODE_REGISTERED: &str = "registry.node_registered";
    pub const NODE_DEACTIVATED: &str = "registry.node_deactivated";
    pub const NODE_REACTIVATED: &str = "registry.node_reactivated";

    // Trust events
    pub const TRUST_UPDATED: &str = "trust.updated";

    // Security events
    pub const SIGNATURE_FAILED: &str = "security.signature_failed";
    pub const REPLAY_DETECTED: &str = "security.replay_detected";
    pub const POLICY_DENIED: &str = "security.policy_denied";
    pub const RELAY_REJECTED: &str = "security.relay_rejected";

    // Relay events
    pub const PROOF_RELAYED: &str = "relay.proof_relayed";

    // Audit events
    pub const CYCLE_STARTED: &str = "audit.cycle_started";
    pub const CYCLE_SEALED: &str = "audit.cycle_sealed";
    pub const CYCLE_SEAL_REFUSED: &str = "audit.cycle_seal_refused";
}
