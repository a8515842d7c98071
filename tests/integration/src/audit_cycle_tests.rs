//! Audit cycles across federations: inclusion paths, seal determinism and
//! count correction

use crate::test_utils::*;
use fedrelay_audit::{AuditCoordinator, AuditError, AuditScheduler, CycleState};
use fedrelay_core::{AuditSection, Digest, ManualClock, MemoryStore};
use fedrelay_crypto::{global_root, hash, NodeSigner};
use std::sync::Arc;

fn coordinator() -> (Arc<ManualClock>, AuditCoordinator) {
    let clock = Arc::new(ManualClock::new(START_MS));
    let store = Arc::new(MemoryStore::new());
    let coordinator = AuditCoordinator::open(
        store.clone(),
        store,
        clock.clone(),
        &AuditSection::default(),
        Some(NodeSigner::from_key(&[9u8; 32]).unwrap()),
    )
    .unwrap();
    (clock, coordinator)
}

fn leaves(prefix: &str, n: usize) -> Vec<(String, Digest)> {
    (0..n)
        .map(|i| {
            let id = format!("{}-{:03}", prefix, i);
            let digest = hash(id.as_bytes());
            (id, digest)
        })
        .collect()
}

#[test]
fn test_every_leaf_verifies_and_mutations_do_not() {
    let (clock, audit) = coordinator();
    clock.advance(DAY);
    let n = audit.trigger().unwrap();

    // Odd and non-power-of-two sizes exercise padding
    let sizes = [("opencore", 7), ("trustnet", 1), ("ledgerx", 12)];
    for (federation_id, size) in sizes {
        audit
            .store_federation_leaves(n, federation_id, leaves(federation_id, size))
            .unwrap();
    }
    audit.complete_cycle(n, 20).unwrap();

    for (federation_id, size) in sizes {
        for (_, digest) in leaves(federation_id, size) {
            let path = audit.merkle_path(n, federation_id, &digest).unwrap().unwrap();
            assert!(audit.verify_digest(&digest, federation_id, n, &path));

            let mut mutated = digest;
            mutated[31] ^= 0x01;
            assert!(!audit.verify_digest(&mutated, federation_id, n, &path));
        }
    }

    // A leaf of one federation does not verify against another
    let (_, foreign) = &leaves("opencore", 7)[0];
    let path = audit.merkle_path(n, "opencore", foreign).unwrap().unwrap();
    assert!(!audit.verify_digest(foreign, "ledgerx", n, &path));
    assert_eq!(audit.merkle_path(n, "opencore", &hash(b"absent")).unwrap(), None);
}

#[test]
fn test_global_root_independent_of_submission_order() {
    let (clock_a, a) = coordinator();
    let (clock_b, b) = coordinator();
    clock_a.advance(DAY);
    clock_b.advance(DAY);
    let na = a.trigger().unwrap();
    let nb = b.trigger().unwrap();

    for federation_id in ["opencore", "trustnet", "ledgerx"] {
        a.store_federation_leaves(na, federation_id, leaves(federation_id, 3))
            .unwrap();
    }
    for federation_id in ["ledgerx", "opencore", "trustnet"] {
        let mut reversed = leaves(federation_id, 3);
        reversed.reverse();
        b.store_federation_leaves(nb, federation_id, reversed).unwrap();
    }

    let root_a = a.complete_cycle(na, 9).unwrap();
    let root_b = b.complete_cycle(nb, 9).unwrap();
    assert_eq!(root_a, root_b);

    let cycle = a.cycle(na).unwrap().unwrap();
    let expected = global_root(
        cycle
            .federation_merkle_roots
            .iter()
            .map(|(id, r)| (id.as_str(), &r.root)),
    );
    assert_eq!(root_a, expected);
}

#[test]
fn test_count_mismatch_keeps_cycle_open_until_corrected() {
    let (clock, audit) = coordinator();
    clock.advance(DAY);
    let n = audit.trigger().unwrap();
    audit
        .store_federation_leaves(n, "opencore", leaves("opencore", 4))
        .unwrap();

    assert!(matches!(
        audit.complete_cycle(n, 5),
        Err(AuditError::ProofCountMismatch { expected: 5, actual: 4, .. })
    ));
    assert_eq!(audit.cycle_state(n).unwrap(), CycleState::Collecting);

    // Nothing verifies before the seal
    let (_, digest) = &leaves("opencore", 4)[0];
    let path = audit.merkle_path(n, "opencore", digest).unwrap().unwrap();
    assert!(!audit.verify_digest(digest, "opencore", n, &path));

    audit
        .store_federation_leaves(n, "trustnet", leaves("trustnet", 1))
        .unwrap();
    audit.complete_cycle(n, 5).unwrap();
    assert_eq!(audit.cycle_state(n).unwrap(), CycleState::Sealed);
    assert!(audit.verify_digest(digest, "opencore", n, &path));

    assert!(matches!(
        audit.store_federation_leaves(n, "ledgerx", leaves("ledgerx", 1)),
        Err(AuditError::CycleAlreadySealed(_))
    ));
}

#[test]
fn test_trigger_respects_interval() {
    let (clock, audit) = coordinator();
    assert_eq!(audit.trigger().unwrap(), 0);

    clock.advance(DAY - std::time::Duration::from_millis(1));
    assert_eq!(audit.trigger().unwrap(), 0);

    clock.advance(std::time::Duration::from_millis(1));
    assert_eq!(audit.trigger().unwrap(), 1);

    // Collecting cycles block the next one
    clock.advance(DAY * 3);
    assert_eq!(audit.trigger().unwrap(), 1);
}

#[test]
fn test_seal_signature_checks_coordinator_key() {
    let (clock, audit) = coordinator();
    clock.advance(DAY);
    let n = audit.trigger().unwrap();
    audit
        .store_federation_leaves(n, "opencore", leaves("opencore", 2))
        .unwrap();
    audit.complete_cycle(n, 2).unwrap();

    let key = audit.seal_public_key().unwrap();
    assert!(audit.verify_seal(n, &key));
    assert!(!audit.verify_seal(n, &NodeSigner::generate().public_key()));
}

#[tokio::test]
async fn test_cycle_with_unsubmitted_federation_is_not_sealed() {
    let net = TestNetwork::in_memory();
    let svc = &net.service;
    let origin = net.node("opencore", "oc_n01").await;
    net.node("trustnet", "tn_n01").await;
    svc.update_trust_score("opencore", "oc_n01", &reference_metrics())
        .unwrap();
    let proof = svc
        .create_proof("oc_n01", "opencore", claim(1), &origin.signer)
        .await
        .unwrap();
    svc.relay_proof(&proof, "trustnet").await.unwrap();

    net.clock.advance(DAY);
    let n = svc.trigger_audit_cycle().unwrap();
    assert!(matches!(
        svc.complete_audit_cycle(n, 0),
        Err(AuditError::PendingFederations { ref federations, .. })
            if federations == &vec!["opencore".to_string(), "trustnet".to_string()]
    ));

    svc.store_federation_root(n, "opencore", &[proof.clone()]).unwrap();
    assert!(matches!(
        svc.complete_audit_cycle(n, 1),
        Err(AuditError::PendingFederations { ref federations, .. })
            if federations == &vec!["trustnet".to_string()]
    ));
    assert_eq!(svc.audit().cycle_state(n).unwrap(), CycleState::Collecting);

    // The scheduler finishes the collection
    net.clock.advance(std::time::Duration::from_secs(60));
    let sealed = AuditScheduler::new(svc.audit().clone(), net.proofs.clone(), std::time::Duration::from_secs(60))
        .tick()
        .unwrap()
        .unwrap();
    assert_eq!(sealed.cycle_number, n);
    assert_eq!(sealed.total_proofs, 2);
}
