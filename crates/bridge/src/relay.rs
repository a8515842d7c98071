//! Cross-federation relay protocol.
//!
//! A relay verifies a proof against the state of its creating node, claims
//! the proof's nonce at the target federation, asks the Policy Gate, and only
//! then writes an independent record at the target carrying the same digest.
//! A nonce claimed by a relay that fails later is released again, so a
//! rejected relay leaves nothing behind.

use crate::bridge::ProofBridge;
use crate::directory::Federation;
use crate::replay::ReplayError;
use fedrelay_core::event::{event_types, EventCategory, EventSeverity};
use fedrelay_core::{Proof, RelayResult, StoreError, VerificationStatus};
use fedrelay_crypto::{hash, verify_digest_signature};
use fedrelay_trust_mesh::{PolicyAction, PolicyContext, RegistryError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Unknown federation: {0}")]
    UnknownFederation(String),

    #[error("Proof {proof_id} cannot be relayed back into {target_federation_id}")]
    LoopbackRelay {
        proof_id: String,
        target_federation_id: String,
    },

    #[error("Signature invalid for proof {proof_id}: {reason}")]
    SignatureInvalid { proof_id: String, reason: String },

    #[error("Trust insufficient for node {node_id}: score {score} < {required}")]
    TrustInsufficient {
        node_id: String,
        score: u64,
        required: u64,
    },

    #[error("Replay detected: nonce {nonce} already relayed to {target_federation_id}")]
    ReplayDetected {
        nonce: String,
        target_federation_id: String,
    },

    #[error("Relay denied by policy: {}", .0.join("; "))]
    PolicyDenied(Vec<String>),

    #[error("Proof {proof_id} is outside the replay window: {reason}")]
    ProofExpired { proof_id: String, reason: String },

    #[error("Replay cache of {0} is saturated")]
    ReplayCacheSaturated(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Replay cache error: {0}")]
    ReplayCache(ReplayError),
}

impl RelayError {
    /// Verification outcome this rejection corresponds to, if any
    pub fn verification_status(&self) -> Option<VerificationStatus> {
        match self {
            RelayError::SignatureInvalid { .. } => Some(VerificationStatus::SignatureInvalid),
            RelayError::TrustInsufficient { .. } => Some(VerificationStatus::TrustInsufficient),
            RelayError::ReplayDetected { .. } => Some(VerificationStatus::ReplayDetected),
            _ => None,
        }
    }

    fn severity(&self) -> EventSeverity {
        match self {
            RelayError::SignatureInvalid { .. } | RelayError::ReplayDetected { .. } => {
                EventSeverity::Critical
            }
            RelayError::Registry(_) | RelayError::Store(_) | RelayError::ReplayCache(_) => {
                EventSeverity::Error
            }
            _ => EventSeverity::Warning,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            RelayError::SignatureInvalid { .. } => event_types::SIGNATURE_FAILED,
            RelayError::ReplayDetected { .. } => event_types::REPLAY_DETECTED,
            RelayError::PolicyDenied(_) => event_types::POLICY_DENIED,
            _ => event_types::RELAY_REJECTED,
        }
    }
}

/// Id of the record a relay writes at `target_federation_id`
pub fn relayed_proof_id(source_proof_id: &str, target_federation_id: &str) -> String {
    let mut material = Vec::with_capacity(source_proof_id.len() + 1 + target_federation_id.len());
    material.extend_from_slice(source_proof_id.as_bytes());
    material.push(0);
    material.extend_from_slice(target_federation_id.as_bytes());

    let mut id = hex::encode(hash(&material));
    id.truncate(32);
    format!("relay-{}", id)
}

impl ProofBridge {
    /// Relay `proof` from the federation holding it to `target_federation_id`.
    ///
    /// Rejections are logged and published as events; nothing is retried.
    pub async fn relay(
        &self,
        proof: &Proof,
        target_federation_id: &str,
    ) -> Result<RelayResult, RelayError> {
        match self.try_relay(proof, target_federation_id).await {
            Ok(result) => {
                info!(
                    source_federation_id = %proof.federation_id,
                    target_federation_id = %target_federation_id,
                    node_id = %proof.node_id,
                    proof_id = %proof.proof_id,
                    target_proof_id = %result.target_proof_id,
                    "Proof relayed"
                );
                self.publish(
                    self.event(event_types::PROOF_RELAYED)
                        .category(EventCategory::Relay)
                        .node(proof.origin_federation_id.clone(), proof.node_id.clone())
                        .message(format!("relayed to {}", target_federation_id))
                        .metadata("proof_id", proof.proof_id.clone())
                        .metadata("target_proof_id", result.target_proof_id.clone())
                        .metadata("digest", proof.digest_hex())
                        .build(),
                );
                Ok(result)
            }
            Err(e) => {
                warn!(
                    source_federation_id = %proof.federation_id,
                    target_federation_id = %target_federation_id,
                    node_id = %proof.node_id,
                    proof_id = %proof.proof_id,
                    error = %e,
                    "Relay rejected"
                );
                self.publish(
                    self.event(e.event_type())
                        .category(EventCategory::Security)
                        .severity(e.severity())
                        .node(proof.origin_federation_id.clone(), proof.node_id.clone())
                        .message(e.to_string())
                        .metadata("proof_id", proof.proof_id.clone())
                        .metadata("target_federation_id", target_federation_id)
                        .build(),
                );
                Err(e)
            }
        }
    }

    async fn try_relay(
        &self,
        proof: &Proof,
        target_federation_id: &str,
    ) -> Result<RelayResult, RelayError> {
        let source = self.federation(&proof.federation_id)?;
        let origin = self.federation(&proof.origin_federation_id)?;
        let target = self.federation(target_federation_id)?;
        if target.id() == source.id() || target.id() == origin.id() {
            return Err(RelayError::LoopbackRelay {
                proof_id: proof.proof_id.clone(),
                target_federation_id: target_federation_id.to_string(),
            });
        }

        // 1. Signature against the creating node's registered key
        let node = match origin.registry().lookup(&proof.node_id) {
            Ok(node) => node,
            Err(RegistryError::NotFound(_)) => {
                return Err(RelayError::SignatureInvalid {
                    proof_id: proof.proof_id.clone(),
                    reason: format!("unknown signer {}", proof.node_id),
                })
            }
            Err(e) => return Err(e.into()),
        };
        verify_digest_signature(&node.public_key, &proof.digest, &proof.signature).map_err(
            |e| RelayError::SignatureInvalid {
                proof_id: proof.proof_id.clone(),
                reason: e.to_string(),
            },
        )?;

        // 2. Relay trust bar
        if !node.is_active() || node.trust_score < self.relay_min_trust {
            return Err(RelayError::TrustInsufficient {
                node_id: node.node_id,
                score: node.trust_score,
                required: self.relay_min_trust,
            });
        }

        // 3. Claim the nonce at the target. A future-dated proof stays
        // acceptable until its own timestamp leaves the window, so its nonce
        // is kept at least that long.
        let now = self.clock.now_ms();
        let replay = target.replay();
        replay
            .check_timestamp(proof.timestamp, now)
            .map_err(|e| RelayError::ProofExpired {
                proof_id: proof.proof_id.clone(),
                reason: e.to_string(),
            })?;
        replay
            .insert_if_absent(&proof.nonce, now.max(proof.timestamp))
            .map_err(|e| match e {
                ReplayError::DuplicateNonce(nonce) => RelayError::ReplayDetected {
                    nonce,
                    target_federation_id: target_federation_id.to_string(),
                },
                ReplayError::Saturated { .. } => {
                    RelayError::ReplayCacheSaturated(target_federation_id.to_string())
                }
                other => RelayError::ReplayCache(other),
            })?;
        debug!(target_federation_id = %target_federation_id, nonce = %proof.nonce, "Nonce claimed");

        // 4 and 5 release the nonce on failure, unless the failure was a replay
        let outcome = self
            .authorize_and_persist(proof, &source, &target, node.trust_score, now)
            .await;
        if matches!(&outcome, Err(e) if !matches!(e, RelayError::ReplayDetected { .. })) {
            if let Err(e) = replay.release(&proof.nonce) {
                warn!(nonce = %proof.nonce, error = %e, "Failed to release nonce");
            }
        }
        outcome
    }

    async fn authorize_and_persist(
        &self,
        proof: &Proof,
        source: &Federation,
        target: &Federation,
        trust_score: u64,
        now: u64,
    ) -> Result<RelayResult, RelayError> {
        let decision = self
            .policy
            .decide(
                PolicyAction::RelayProof,
                &PolicyContext::relay(
                    source.id(),
                    target.id(),
                    proof.node_id.clone(),
                    trust_score,
                    proof.payload_fields.clone(),
                ),
            )
            .await;
        if !decision.is_allowed() {
            return Err(RelayError::PolicyDenied(decision.deny_reasons));
        }

        let replayed = || RelayError::ReplayDetected {
            nonce: proof.nonce.clone(),
            target_federation_id: target.id().to_string(),
        };

        // Another proof id at the source already carries this nonce
        match source.append_proof(proof, now) {
            Ok(_) => {}
            Err(StoreError::DuplicateNonce(_)) => return Err(replayed()),
            Err(e) => return Err(e.into()),
        }

        let record = Proof {
            proof_id: relayed_proof_id(&proof.proof_id, target.id()),
            federation_id: target.id().to_string(),
            timestamp: now,
            ..proof.clone()
        };
        match target.append_proof(&record, now) {
            Ok(_) => {}
            // The nonce was forgotten (restart) but the record survived
            Err(StoreError::ImmutableRecord(_)) | Err(StoreError::DuplicateNonce(_)) => {
                return Err(replayed())
            }
            Err(e) => return Err(e.into()),
        }

        debug_assert_eq!(proof.digest, record.digest);
        Ok(RelayResult {
            source_digest: proof.digest,
            target_digest: record.digest,
            verification_status: VerificationStatus::Verified,
            target_proof_id: record.proof_id,
        })
    }

    fn federation(&self, federation_id: &str) -> Result<Arc<Federation>, RelayError> {
        self.directory
            .get(federation_id)
            .ok_or_else(|| RelayError::UnknownFederation(federation_id.to_string()))
    }
}
