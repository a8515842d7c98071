//! Proof creation at the home federation.

use crate::bridge::ProofBridge;
use fedrelay_core::{Proof, StoreError};
use fedrelay_crypto::{payload_digest, payload_fields, NodeSigner};
use fedrelay_trust_mesh::{PolicyAction, PolicyContext, RegistryError};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Unknown federation: {0}")]
    UnknownFederation(String),

    #[error("Node {node_id} is not registered in {federation_id}")]
    UnknownNode {
        node_id: String,
        federation_id: String,
    },

    #[error("Node {0} is inactive")]
    NodeInactive(String),

    #[error("Signing key does not match the registered key of {0}")]
    KeyMismatch(String),

    #[error("Rejected by policy: {}", .0.join("; "))]
    PolicyRejected(Vec<String>),

    #[error("Registry error: {0}")]
    Registry(RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ProofBridge {
    /// Create, sign and record a proof over the allow-listed fields of
    /// `payload`.
    ///
    /// The signing key stays with the caller; it must belong to the node's
    /// registered public key.
    ///
    /// The signature covers the digest only. The nonce and timestamp are not
    /// signed, since every relayed copy carries the relay time as its
    /// timestamp. A nonce can still only be spent once per federation: the
    /// target's replay cache and the stores' per-federation nonce uniqueness
    /// reject a signed digest re-wrapped under another proof id.
    pub async fn create_proof(
        &self,
        node_id: &str,
        federation_id: &str,
        payload: Map<String, Value>,
        signer: &NodeSigner,
    ) -> Result<Proof, BridgeError> {
        let federation = self
            .directory
            .get(federation_id)
            .ok_or_else(|| BridgeError::UnknownFederation(federation_id.to_string()))?;

        let node = federation.registry().lookup(node_id).map_err(|e| match e {
            RegistryError::NotFound(_) => BridgeError::UnknownNode {
                node_id: node_id.to_string(),
                federation_id: federation_id.to_string(),
            },
            other => BridgeError::Registry(other),
        })?;
        if !node.is_active() {
            return Err(BridgeError::NodeInactive(node_id.to_string()));
        }
        if signer.public_key() != node.public_key {
            warn!(
                federation_id = %federation_id,
                node_id = %node_id,
                key_id = %signer.key_id(),
                "Proof signing key does not match registration"
            );
            return Err(BridgeError::KeyMismatch(node_id.to_string()));
        }

        let digest = payload_digest(&payload, &self.payload_allow_list);
        let fields = payload_fields(&payload, &self.payload_allow_list);

        let decision = self
            .policy
            .decide(
                PolicyAction::CreateProof,
                &PolicyContext::proof_creation(federation_id, node_id, payload),
            )
            .await;
        if !decision.is_allowed() {
            warn!(
                federation_id = %federation_id,
                node_id = %node_id,
                reasons = ?decision.deny_reasons,
                "Proof creation rejected by policy"
            );
            return Err(BridgeError::PolicyRejected(decision.deny_reasons));
        }

        let now = self.clock.now_ms();
        let proof = Proof {
            proof_id: uuid::Uuid::new_v4().to_string(),
            federation_id: federation_id.to_string(),
            origin_federation_id: federation_id.to_string(),
            node_id: node_id.to_string(),
            digest,
            signature: signer.sign_digest(&digest),
            timestamp: now,
            nonce: hex::encode(rand::random::<[u8; 16]>()),
            payload_fields: fields,
        };
        federation.append_proof(&proof, now)?;

        info!(
            federation_id = %federation_id,
            node_id = %node_id,
            proof_id = %proof.proof_id,
            digest = %proof.digest_hex(),
            "Proof created"
        );
        Ok(proof)
    }
}
