//! Restart durability over the SQLite store

use crate::test_utils::*;
use fedrelay_bridge::RelayError;
use fedrelay_core::{ManualClock, NodeStatus, Proof};
use std::sync::Arc;

struct TempDb(std::path::PathBuf);

impl Drop for TempDb {
    fn drop(&mut self) {
        cleanup_db(&self.0);
    }
}

async fn relay_once(net: &TestNetwork) -> (TestNode, Proof, String) {
    let origin = net.node("opencore", "oc_n01").await;
    net.node("trustnet", "tn_n01").await;
    net.service
        .update_trust_score("opencore", "oc_n01", &reference_metrics())
        .unwrap();

    let proof = net
        .service
        .create_proof("oc_n01", "opencore", claim(1), &origin.signer)
        .await
        .unwrap();
    let result = net.service.relay_proof(&proof, "trustnet").await.unwrap();
    (origin, proof, result.target_proof_id)
}

#[tokio::test]
async fn test_registry_and_proofs_survive_restart() {
    let db = TempDb(temp_db_path());
    let clock = Arc::new(ManualClock::new(START_MS));

    let (proof, target_proof_id) = {
        let net = TestNetwork::sqlite(&db.0, clock.clone());
        let (_, proof, target_proof_id) = relay_once(&net).await;
        net.service.deactivate_node("trustnet", "tn_n01").await.unwrap();
        (proof, target_proof_id)
    };

    let net = TestNetwork::sqlite(&db.0, clock);
    let svc = &net.service;

    let mut ids = svc.directory().federation_ids();
    ids.sort();
    assert_eq!(ids, vec!["opencore".to_string(), "trustnet".to_string()]);

    let node = svc.lookup_node("opencore", "oc_n01").unwrap();
    assert_eq!(node.trust_score, 978_700);
    assert_eq!(node.status, NodeStatus::Active);

    let suspended = svc.lookup_node("trustnet", "tn_n01").unwrap();
    assert_eq!(suspended.status, NodeStatus::Inactive);
    assert!(suspended.administratively_suspended);

    let opencore = svc.directory().get("opencore").unwrap();
    assert_eq!(opencore.get_proof(&proof.proof_id).unwrap(), Some(proof.clone()));
    let relayed = svc
        .directory()
        .get("trustnet")
        .unwrap()
        .get_proof(&target_proof_id)
        .unwrap()
        .unwrap();
    assert_eq!(relayed.digest, proof.digest);
}

#[tokio::test]
async fn test_replay_still_detected_after_restart() {
    let db = TempDb(temp_db_path());
    let clock = Arc::new(ManualClock::new(START_MS));

    let proof = {
        let net = TestNetwork::sqlite(&db.0, clock.clone());
        relay_once(&net).await.1
    };

    clock.advance(std::time::Duration::from_secs(60));
    let net = TestNetwork::sqlite(&db.0, clock);
    let trustnet = net.service.directory().get("trustnet").unwrap();
    assert!(trustnet.replay().contains(&proof.nonce));

    assert!(matches!(
        net.service.relay_proof(&proof, "trustnet").await,
        Err(RelayError::ReplayDetected { .. })
    ));
    assert_eq!(trustnet.proof_count().unwrap(), 1);
}

#[tokio::test]
async fn test_rewrapped_proof_rejected_after_restart() {
    let db = TempDb(temp_db_path());
    let clock = Arc::new(ManualClock::new(START_MS));

    let proof = {
        let net = TestNetwork::sqlite(&db.0, clock.clone());
        relay_once(&net).await.1
    };

    clock.advance(std::time::Duration::from_secs(60));
    let net = TestNetwork::sqlite(&db.0, clock);
    let forged = Proof {
        proof_id: "forged-id".to_string(),
        ..proof.clone()
    };

    // Caught by the warmed replay cache
    assert!(matches!(
        net.service.relay_proof(&forged, "trustnet").await,
        Err(RelayError::ReplayDetected { .. })
    ));

    // And by the stores once the cache has forgotten the nonce
    let trustnet = net.service.directory().get("trustnet").unwrap();
    trustnet.replay().release(&proof.nonce).unwrap();
    assert!(matches!(
        net.service.relay_proof(&forged, "trustnet").await,
        Err(RelayError::ReplayDetected { .. })
    ));

    assert_eq!(trustnet.proof_count().unwrap(), 1);
    let opencore = net.service.directory().get("opencore").unwrap();
    assert_eq!(opencore.get_proof("forged-id").unwrap(), None);
    assert_eq!(opencore.proof_count().unwrap(), 1);
}

#[tokio::test]
async fn test_sealed_cycles_survive_restart() {
    let db = TempDb(temp_db_path());
    let clock = Arc::new(ManualClock::new(START_MS));

    let (proof, global_root) = {
        let net = TestNetwork::sqlite(&db.0, clock.clone());
        let (_, proof, _) = relay_once(&net).await;
        let sealed = net.seal_next_cycle();
        assert_eq!(sealed.total_proofs, 2);
        (proof, sealed.global_root)
    };

    let net = TestNetwork::sqlite(&db.0, clock);
    let svc = &net.service;
    assert_eq!(svc.audit().latest_cycle_number(), 1);

    let cycle = svc.audit().cycle(1).unwrap().unwrap();
    assert!(cycle.completed);
    assert_eq!(cycle.global_root, Some(global_root));

    let path = svc.merkle_path(1, "opencore", &proof.digest).unwrap().unwrap();
    assert!(svc.verify_digest(&proof.digest, "opencore", 1, &path));
    let key = svc.audit().seal_public_key().unwrap();
    assert!(svc.audit().verify_seal(1, &key));

    // The next cycle opens a full interval after cycle 1 started
    assert_eq!(svc.trigger_audit_cycle().unwrap(), 1);
    let next = net.seal_next_cycle();
    assert_eq!(next.cycle_number, 2);
    assert_eq!(next.total_proofs, 0);
}
