//! Two-federation flow from registration to a sealed audit cycle

use crate::test_utils::*;
use fedrelay_core::{NodeStatus, VerificationStatus};
use fedrelay_crypto::verify_path;

#[tokio::test]
async fn test_settlement_claim_relayed_and_audited() {
    init_test_logging();
    let net = TestNetwork::in_memory();
    let svc = &net.service;

    let origin = net.node("opencore", "oc_n01").await;
    net.node("trustnet", "tn_n01").await;

    let score = svc
        .update_trust_score("opencore", "oc_n01", &reference_metrics())
        .unwrap();
    assert_eq!(score, 978_700);
    assert!((950_000..=980_000).contains(&score));
    assert_eq!(svc.lookup_node("opencore", "oc_n01").unwrap().status, NodeStatus::Active);

    let proof = svc
        .create_proof("oc_n01", "opencore", claim(1), &origin.signer)
        .await
        .unwrap();
    let result = svc.relay_proof(&proof, "trustnet").await.unwrap();
    assert_eq!(result.verification_status, VerificationStatus::Verified);
    assert_eq!(result.source_digest, proof.digest);
    assert_eq!(result.target_digest, proof.digest);

    let relayed = svc
        .directory()
        .get("trustnet")
        .unwrap()
        .get_proof(&result.target_proof_id)
        .unwrap()
        .unwrap();
    assert_eq!(relayed.federation_id, "trustnet");
    assert_eq!(relayed.origin_federation_id, "opencore");
    assert_eq!(relayed.digest, proof.digest);

    let sealed = net.seal_next_cycle();
    assert_eq!(sealed.cycle_number, 1);
    assert_eq!(sealed.total_proofs, 2);

    let cycle = svc.audit().cycle(1).unwrap().unwrap();
    assert!(cycle.completed);
    assert_eq!(cycle.global_root, Some(sealed.global_root));
    assert_eq!(cycle.federation_merkle_roots.len(), 2);

    for federation_id in ["opencore", "trustnet"] {
        let path = svc.merkle_path(1, federation_id, &proof.digest).unwrap().unwrap();
        assert!(svc.verify_digest(&proof.digest, federation_id, 1, &path));
        let root = cycle.federation_merkle_roots[federation_id].root;
        assert!(verify_path(&proof.digest, &path, &root));
    }

    let seal_key = svc.audit().seal_public_key().unwrap();
    assert!(svc.audit().verify_seal(1, &seal_key));
}

#[tokio::test]
async fn test_relayed_record_forwarded_to_third_federation() {
    let net = TestNetwork::in_memory();
    let svc = &net.service;

    let origin = net.node("opencore", "oc_n01").await;
    net.node("trustnet", "tn_n01").await;
    net.node("ledgerx", "lx_n01").await;

    let proof = svc
        .create_proof("oc_n01", "opencore", claim(2), &origin.signer)
        .await
        .unwrap();
    let first = svc.relay_proof(&proof, "trustnet").await.unwrap();
    let forwarded = svc
        .directory()
        .get("trustnet")
        .unwrap()
        .get_proof(&first.target_proof_id)
        .unwrap()
        .unwrap();

    let second = svc.relay_proof(&forwarded, "ledgerx").await.unwrap();
    assert_eq!(second.verification_status, VerificationStatus::Verified);

    let at_ledgerx = svc
        .directory()
        .get("ledgerx")
        .unwrap()
        .get_proof(&second.target_proof_id)
        .unwrap()
        .unwrap();
    assert_eq!(at_ledgerx.origin_federation_id, "opencore");
    assert_eq!(at_ledgerx.node_id, "oc_n01");
}

#[tokio::test]
async fn test_quiet_cycle_after_busy_cycle() {
    let net = TestNetwork::in_memory();
    let svc = &net.service;
    let origin = net.node("opencore", "oc_n01").await;

    svc.create_proof("oc_n01", "opencore", claim(3), &origin.signer)
        .await
        .unwrap();
    assert_eq!(net.seal_next_cycle().total_proofs, 1);

    let quiet = net.seal_next_cycle();
    assert_eq!(quiet.cycle_number, 2);
    assert_eq!(quiet.total_proofs, 0);
    assert_eq!(quiet.global_root, fedrelay_crypto::hash(&[]));
}
