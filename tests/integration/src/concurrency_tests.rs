//! Concurrent access through the service facade

use crate::test_utils::*;
use fedrelay_bridge::RelayError;
use fedrelay_core::{NodeStatus, VerificationStatus};
use fedrelay_trust_mesh::RegistryError;
use std::collections::BTreeMap;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_relays_of_distinct_proofs_all_verify() {
    let net = Arc::new(TestNetwork::in_memory());
    let origin = Arc::new(net.node("opencore", "oc_n01").await);
    net.node("trustnet", "tn_n01").await;

    let mut handles = Vec::new();
    for i in 0..32u64 {
        let net = net.clone();
        let origin = origin.clone();
        handles.push(tokio::spawn(async move {
            let proof = net
                .service
                .create_proof("oc_n01", "opencore", claim(i), &origin.signer)
                .await
                .unwrap();
            net.service.relay_proof(&proof, "trustnet").await.unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().verification_status, VerificationStatus::Verified);
    }

    let svc = &net.service;
    assert_eq!(svc.directory().get("opencore").unwrap().proof_count().unwrap(), 32);
    assert_eq!(svc.directory().get("trustnet").unwrap().proof_count().unwrap(), 32);
    assert_eq!(net.seal_next_cycle().total_proofs, 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_replays_admit_exactly_one() {
    let net = Arc::new(TestNetwork::in_memory());
    let origin = net.node("opencore", "oc_n01").await;
    net.node("trustnet", "tn_n01").await;
    let proof = Arc::new(
        net.service
            .create_proof("oc_n01", "opencore", claim(1), &origin.signer)
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..16 {
        let net = net.clone();
        let proof = proof.clone();
        handles.push(tokio::spawn(async move {
            net.service.relay_proof(&proof, "trustnet").await
        }));
    }

    let mut verified = 0;
    let mut replays = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => verified += 1,
            Err(RelayError::ReplayDetected { .. }) => replays += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((verified, replays), (1, 15));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration_of_same_id() {
    let net = Arc::new(TestNetwork::in_memory());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let net = net.clone();
        handles.push(tokio::spawn(async move {
            let node = TestNode::new("opencore", "oc_n01");
            net.service
                .register_node("oc_n01", "opencore", &node.signer.public_key(), 0, BTreeMap::new())
                .await
        }));
    }

    let mut registered = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => registered += 1,
            Err(RegistryError::DuplicateNode(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(registered, 1);
    assert_eq!(net.service.directory().federation_ids(), vec!["opencore".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_trust_updates_leave_consistent_status() {
    let net = Arc::new(TestNetwork::in_memory());
    net.node("opencore", "oc_n01").await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let net = net.clone();
        let metrics = if i % 2 == 0 {
            reference_metrics()
        } else {
            metrics_at(0.5)
        };
        handles.push(tokio::spawn(async move {
            net.service
                .update_trust_score("opencore", "oc_n01", &metrics)
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let node = net.service.lookup_node("opencore", "oc_n01").unwrap();
    match node.trust_score {
        978_700 => assert_eq!(node.status, NodeStatus::Active),
        500_000 => assert_eq!(node.status, NodeStatus::Inactive),
        other => panic!("unexpected score {other}"),
    }
}
