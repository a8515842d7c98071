//! Policy Gate boundary.
//!
//! The Policy Gate is an external allow/deny oracle. The relay core only
//! sees it through [`PolicyGate`] and always calls it through a
//! [`GuardedPolicyGate`], which bounds every evaluation with a timeout and
//! turns timeouts and gate failures into deny decisions.
//!
//! [`LocalPolicyGate`] is the in-process default: it screens registration
//! metadata and proof payloads for personal-data field names.

use async_trait::async_trait;
use fedrelay_core::config::{PolicySection, RelaySection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Operation the gate is asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    RegisterNode,
    DeactivateNode,
    ReactivateNode,
    CreateProof,
    RelayProof,
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyAction::RegisterNode => "register_node",
            PolicyAction::DeactivateNode => "deactivate_node",
            PolicyAction::ReactivateNode => "reactivate_node",
            PolicyAction::CreateProof => "create_proof",
            PolicyAction::RelayProof => "relay_proof",
        };
        f.write_str(name)
    }
}

/// Everything the gate may inspect for one decision
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyContext {
    pub node_id: String,
    pub source_federation_id: String,
    pub target_federation_id: Option<String>,
    pub trust_score: Option<u64>,
    /// Registration metadata
    pub metadata: BTreeMap<String, String>,
    /// Full payload, only present when a proof is being created
    pub payload: Option<Map<String, Value>>,
    /// Payload field names (shape only) of a proof being relayed
    pub payload_fields: Vec<String>,
}

impl PolicyContext {
    pub fn registration(
        federation_id: impl Into<String>,
        node_id: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            source_federation_id: federation_id.into(),
            metadata,
            ..Default::default()
        }
    }

    pub fn administrative(federation_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            source_federation_id: federation_id.into(),
            ..Default::default()
        }
    }

    pub fn proof_creation(
        federation_id: impl Into<String>,
        node_id: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            source_federation_id: federation_id.into(),
            payload: Some(payload),
            ..Default::default()
        }
    }

    pub fn relay(
        source_federation_id: impl Into<String>,
        target_federation_id: impl Into<String>,
        node_id: impl Into<String>,
        trust_score: u64,
        payload_fields: Vec<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            source_federation_id: source_federation_id.into(),
            target_federation_id: Some(target_federation_id.into()),
            trust_score: Some(trust_score),
            payload_fields,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allow: bool,
    pub deny_reasons: Vec<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allow: true,
            deny_reasons: Vec::new(),
        }
    }

    pub fn deny(reasons: Vec<String>) -> Self {
        Self {
            allow: false,
            deny_reasons: reasons,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allow
    }
}

/// Failure to obtain a decision at all
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Policy evaluator unavailable: {0}")]
    Unavailable(String),

    #[error("Policy evaluation failed: {0}")]
    Evaluation(String),
}

/// External allow/deny oracle
#[async_trait]
pub trait PolicyGate: Send + Sync {
    async fn evaluate(
        &self,
        action: PolicyAction,
        context: &PolicyContext,
    ) -> Result<PolicyDecision, PolicyError>;
}

pub const TIMEOUT_REASON: &str = "policy evaluation timed out";

/// Fail-closed wrapper: bounded by a timeout, never errors, never fails open
#[derive(Clone)]
pub struct GuardedPolicyGate {
    inner: Arc<dyn PolicyGate>,
    timeout: Duration,
}

impl GuardedPolicyGate {
    pub fn new(inner: Arc<dyn PolicyGate>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn decide(&self, action: PolicyAction, context: &PolicyContext) -> PolicyDecision {
        match tokio::time::timeout(self.timeout, self.inner.evaluate(action, context)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                warn!(%action, node_id = %context.node_id, error = %e, "Policy gate failed, denying");
                PolicyDecision::deny(vec![e.to_string()])
            }
            Err(_) => {
                warn!(
                    %action,
                    node_id = %context.node_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Policy gate timed out, denying"
                );
                PolicyDecision::deny(vec![TIMEOUT_REASON.to_string()])
            }
        }
    }
}

#[async_trait]
impl PolicyGate for GuardedPolicyGate {
    async fn evaluate(
        &self,
        action: PolicyAction,
        context: &PolicyContext,
    ) -> Result<PolicyDecision, PolicyError> {
        Ok(self.decide(action, context).await)
    }
}

impl fmt::Debug for GuardedPolicyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedPolicyGate")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// In-process personal-data screen
#[derive(Debug, Clone)]
pub struct LocalPolicyGate {
    /// Lowercase field names treated as personal data
    disallowed_fields: Vec<String>,
    payload_allow_list: Vec<String>,
}

impl LocalPolicyGate {
    pub fn new(disallowed_fields: Vec<String>, payload_allow_list: Vec<String>) -> Self {
        Self {
            disallowed_fields: disallowed_fields
                .into_iter()
                .map(|f| f.to_lowercase())
                .collect(),
            payload_allow_list,
        }
    }

    pub fn from_config(policy: &PolicySection, relay: &RelaySection) -> Self {
        Self::new(
            policy.disallowed_fields.clone(),
            relay.payload_allow_list.clone(),
        )
    }

    fn is_personal(&self, field: &str) -> bool {
        let lower = field.to_lowercase();
        self.disallowed_fields.iter().any(|d| *d == lower)
    }

    fn screen_value(&self, path: &str, value: &Value, reasons: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, nested) in map {
                    let nested_path = format!("{}.{}", path, key);
                    if self.is_personal(key) {
                        reasons.push(format!("payload field '{}' is personal data", nested_path));
                    }
                    self.screen_value(&nested_path, nested, reasons);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.screen_value(path, item, reasons);
                }
            }
            _ => {}
        }
    }

    fn screen_payload(&self, payload: &Map<String, Value>) -> Vec<String> {
        let mut reasons = Vec::new();
        for (key, value) in payload {
            if self.is_personal(key) {
                reasons.push(format!("payload field '{}' is personal data", key));
            } else if !self.payload_allow_list.iter().any(|a| a == key) {
                reasons.push(format!("payload field '{}' is not allow-listed", key));
            }
            self.screen_value(key, value, &mut reasons);
        }
        reasons
    }
}

#[async_trait]
impl PolicyGate for LocalPolicyGate {
    async fn evaluate(
        &self,
        action: PolicyAction,
        context: &PolicyContext,
    ) -> Result<PolicyDecision, PolicyError> {
        let reasons: Vec<String> = match action {
            PolicyAction::RegisterNode => context
                .metadata
                .keys()
                .filter(|k| self.is_personal(k))
                .map(|k| format!("metadata field '{}' is personal data", k))
                .collect(),
            PolicyAction::DeactivateNode | PolicyAction::ReactivateNode => Vec::new(),
            PolicyAction::CreateProof => match &context.payload {
                Some(payload) => self.screen_payload(payload),
                None => vec!["missing payload".to_string()],
            },
            PolicyAction::RelayProof => {
                let mut reasons: Vec<String> = context
                    .payload_fields
                    .iter()
                    .filter(|f| self.is_personal(f))
                    .map(|f| format!("payload field '{}' is personal data", f))
                    .collect();
                if context.target_federation_id.as_deref()
                    == Some(context.source_federation_id.as_str())
                {
                    reasons.push("source and target federation are the same".to_string());
                }
                reasons
            }
        };

        if reasons.is_empty() {
            Ok(PolicyDecision::allow())
        } else {
            Ok(PolicyDecision::deny(reasons))
        }
    }
}

/// Gate that allows everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPolicyGate;

#[async_trait]
impl PolicyGate for AllowAllPolicyGate {
    async fn evaluate(
        &self,
        _action: PolicyAction,
        _context: &PolicyContext,
    ) -> Result<PolicyDecision, PolicyError> {
        Ok(PolicyDecision::allow())
    }
}
