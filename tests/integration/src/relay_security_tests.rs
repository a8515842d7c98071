//! Rejections on the relay path and at the trust thresholds

use crate::test_utils::*;
use fedrelay_bridge::{BridgeError, RelayError};
use fedrelay_core::{NodeStatus, VerificationStatus, MIN_TRUST_SCORE, RELAY_MIN_TRUST};
use fedrelay_trust_mesh::RegistryError;
use serde_json::json;
use std::collections::BTreeMap;

async fn two_federations() -> (TestNetwork, TestNode) {
    let net = TestNetwork::in_memory();
    let origin = net.node("opencore", "oc_n01").await;
    net.node("trustnet", "tn_n01").await;
    (net, origin)
}

#[tokio::test]
async fn test_second_relay_of_same_proof_is_replay() {
    let (net, origin) = two_federations().await;
    let svc = &net.service;
    let proof = svc
        .create_proof("oc_n01", "opencore", claim(1), &origin.signer)
        .await
        .unwrap();

    assert_eq!(
        svc.relay_proof(&proof, "trustnet").await.unwrap().verification_status,
        VerificationStatus::Verified
    );

    let err = svc.relay_proof(&proof, "trustnet").await.unwrap_err();
    assert!(matches!(err, RelayError::ReplayDetected { .. }));
    assert_eq!(err.verification_status(), Some(VerificationStatus::ReplayDetected));
    assert_eq!(
        svc.directory().get("trustnet").unwrap().proof_count().unwrap(),
        1
    );
}

#[tokio::test]
async fn test_same_nonce_may_reach_distinct_targets() {
    let (net, origin) = two_federations().await;
    let svc = &net.service;
    net.node("ledgerx", "lx_n01").await;
    let proof = svc
        .create_proof("oc_n01", "opencore", claim(2), &origin.signer)
        .await
        .unwrap();

    svc.relay_proof(&proof, "trustnet").await.unwrap();
    svc.relay_proof(&proof, "ledgerx").await.unwrap();
}

#[tokio::test]
async fn test_tampered_digest_fails_signature() {
    let (net, origin) = two_federations().await;
    let svc = &net.service;
    let mut proof = svc
        .create_proof("oc_n01", "opencore", claim(3), &origin.signer)
        .await
        .unwrap();
    proof.digest[0] ^= 0xff;

    let err = svc.relay_proof(&proof, "trustnet").await.unwrap_err();
    assert_eq!(err.verification_status(), Some(VerificationStatus::SignatureInvalid));
    assert_eq!(
        svc.directory().get("trustnet").unwrap().proof_count().unwrap(),
        0
    );

    // Signature failures claim no nonce
    proof.digest[0] ^= 0xff;
    svc.relay_proof(&proof, "trustnet").await.unwrap();
}

#[tokio::test]
async fn test_minimum_trust_is_inclusive_but_below_relay_bar() {
    let (net, origin) = two_federations().await;
    let svc = &net.service;

    let score = svc
        .update_trust_score("opencore", "oc_n01", &metrics_at(0.75))
        .unwrap();
    assert_eq!(score, MIN_TRUST_SCORE);
    assert_eq!(svc.lookup_node("opencore", "oc_n01").unwrap().status, NodeStatus::Active);

    let proof = svc
        .create_proof("oc_n01", "opencore", claim(4), &origin.signer)
        .await
        .unwrap();
    let err = svc.relay_proof(&proof, "trustnet").await.unwrap_err();
    match err {
        RelayError::TrustInsufficient { score, required, .. } => {
            assert_eq!(score, MIN_TRUST_SCORE);
            assert_eq!(required, RELAY_MIN_TRUST);
        }
        other => panic!("unexpected error: {other}"),
    }

    // Exactly at the relay bar passes
    let score = svc
        .update_trust_score("opencore", "oc_n01", &metrics_at(0.9))
        .unwrap();
    assert_eq!(score, RELAY_MIN_TRUST);
    svc.relay_proof(&proof, "trustnet").await.unwrap();
}

#[tokio::test]
async fn test_node_below_minimum_deactivated_and_recovers() {
    let (net, origin) = two_federations().await;
    let svc = &net.service;

    svc.update_trust_score("opencore", "oc_n01", &metrics_at(0.5))
        .unwrap();
    assert_eq!(svc.lookup_node("opencore", "oc_n01").unwrap().status, NodeStatus::Inactive);
    assert!(matches!(
        svc.create_proof("oc_n01", "opencore", claim(5), &origin.signer).await,
        Err(BridgeError::NodeInactive(_))
    ));

    svc.update_trust_score("opencore", "oc_n01", &reference_metrics())
        .unwrap();
    assert_eq!(svc.lookup_node("opencore", "oc_n01").unwrap().status, NodeStatus::Active);
}

#[tokio::test]
async fn test_suspended_node_stays_inactive_until_reactivated() {
    let (net, origin) = two_federations().await;
    let svc = &net.service;
    let proof = svc
        .create_proof("oc_n01", "opencore", claim(6), &origin.signer)
        .await
        .unwrap();

    svc.deactivate_node("opencore", "oc_n01").await.unwrap();
    svc.update_trust_score("opencore", "oc_n01", &reference_metrics())
        .unwrap();
    assert_eq!(svc.lookup_node("opencore", "oc_n01").unwrap().status, NodeStatus::Inactive);
    assert_eq!(
        svc.relay_proof(&proof, "trustnet").await.unwrap_err().verification_status(),
        Some(VerificationStatus::TrustInsufficient)
    );

    svc.reactivate_node("opencore", "oc_n01").await.unwrap();
    svc.relay_proof(&proof, "trustnet").await.unwrap();
}

#[tokio::test]
async fn test_personal_data_rejected_at_registration_and_creation() {
    let (net, origin) = two_federations().await;
    let svc = &net.service;

    let mut metadata = BTreeMap::new();
    metadata.insert("email".to_string(), "ops@example.org".to_string());
    let err = svc
        .register_node("oc_n02", "opencore", &TestNode::new("opencore", "oc_n02").signer.public_key(), 0, metadata)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::PolicyRejected(_)));
    assert!(svc.lookup_node("opencore", "oc_n02").is_err());

    let mut payload = claim(7);
    payload.insert("full_name".to_string(), json!("Jane Roe"));
    assert!(matches!(
        svc.create_proof("oc_n01", "opencore", payload, &origin.signer).await,
        Err(BridgeError::PolicyRejected(_))
    ));
}

#[tokio::test]
async fn test_stale_proof_rejected_as_expired() {
    let (net, origin) = two_federations().await;
    let svc = &net.service;
    let proof = svc
        .create_proof("oc_n01", "opencore", claim(8), &origin.signer)
        .await
        .unwrap();

    net.clock.advance(DAY + std::time::Duration::from_secs(1));
    svc.update_trust_score("opencore", "oc_n01", &reference_metrics())
        .unwrap();
    assert!(matches!(
        svc.relay_proof(&proof, "trustnet").await,
        Err(RelayError::ProofExpired { .. })
    ));
}

#[tokio::test]
async fn test_relay_to_unknown_federation() {
    let (net, origin) = two_federations().await;
    let svc = &net.service;
    let proof = svc
        .create_proof("oc_n01", "opencore", claim(9), &origin.signer)
        .await
        .unwrap();

    assert!(matches!(
        svc.relay_proof(&proof, "nowhere").await,
        Err(RelayError::UnknownFederation(_))
    ));
}
