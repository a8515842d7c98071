//! In-memory store backend.

use super::{CycleStore, NodeStore, ProofStore, Result, StoreError};
use crate::types::{AuditCycle, Node, Proof};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    /// Registration order is the vector order
    nodes: Vec<Node>,
    node_index: HashMap<(String, String), usize>,
    federations: Vec<String>,
    /// (recorded_at, proof) per federation, in append order
    proofs: HashMap<String, Vec<(u64, Proof)>>,
    proof_federations: Vec<String>,
    cycles: BTreeMap<u64, AuditCycle>,
}

/// Non-durable store implementing every store trait
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn node_key(federation_id: &str, node_id: &str) -> (String, String) {
    (federation_id.to_string(), node_id.to_string())
}

impl NodeStore for MemoryStore {
    fn insert_node(&self, node: &Node) -> Result<()> {
        let mut state = self.state()?;
        let key = node_key(&node.federation_id, &node.node_id);
        if state.node_index.contains_key(&key) {
            return Err(StoreError::DuplicateKey(format!(
                "{}/{}",
                node.federation_id, node.node_id
            )));
        }
        if !state.federations.contains(&node.federation_id) {
            state.federations.push(node.federation_id.clone());
        }
        let index = state.nodes.len();
        state.nodes.push(node.clone());
        state.node_index.insert(key, index);
        Ok(())
    }

    fn update_node(&self, node: &Node) -> Result<()> {
        let mut state = self.state()?;
        let key = node_key(&node.federation_id, &node.node_id);
        let index = *state.node_index.get(&key).ok_or_else(|| {
            StoreError::NotFound(format!("{}/{}", node.federation_id, node.node_id))
        })?;
        state.nodes[index] = node.clone();
        Ok(())
    }

    fn load_node(&self, federation_id: &str, node_id: &str) -> Result<Option<Node>> {
        let state = self.state()?;
        Ok(state
            .node_index
            .get(&node_key(federation_id, node_id))
            .map(|&i| state.nodes[i].clone()))
    }

    fn load_nodes(&self, federation_id: &str) -> Result<Vec<Node>> {
        let state = self.state()?;
        Ok(state
            .nodes
            .iter()
            .filter(|n| n.federation_id == federation_id)
            .cloned()
            .collect())
    }

    fn federations(&self) -> Result<Vec<String>> {
        Ok(self.state()?.federations.clone())
    }
}

impl ProofStore for MemoryStore {
    fn append_proof(&self, proof: &Proof, recorded_at: u64) -> Result<bool> {
        let mut state = self.state()?;
        let records = state.proofs.entry(proof.federation_id.clone()).or_default();

        if let Some((_, existing)) = records.iter().find(|(_, p)| p.proof_id == proof.proof_id) {
            if existing == proof {
                return Ok(false);
            }
            return Err(StoreError::ImmutableRecord(format!(
                "{}/{}",
                proof.federation_id, proof.proof_id
            )));
        }
        if let Some((_, holder)) = records.iter().find(|(_, p)| p.nonce == proof.nonce) {
            return Err(StoreError::DuplicateNonce(format!(
                "{}/{} (held by {})",
                proof.federation_id, proof.nonce, holder.proof_id
            )));
        }

        records.push((recorded_at, proof.clone()));
        if !state.proof_federations.contains(&proof.federation_id) {
            state.proof_federations.push(proof.federation_id.clone());
        }
        Ok(true)
    }

    fn get_proof(&self, federation_id: &str, proof_id: &str) -> Result<Option<Proof>> {
        let state = self.state()?;
        Ok(state.proofs.get(federation_id).and_then(|records| {
            records
                .iter()
                .find(|(_, p)| p.proof_id == proof_id)
                .map(|(_, p)| p.clone())
        }))
    }

    fn proofs_recorded_between(
        &self,
        federation_id: &str,
        from_ms: u64,
        to_ms: u64,
    ) -> Result<Vec<Proof>> {
        let state = self.state()?;
        Ok(state
            .proofs
            .get(federation_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|(at, _)| *at >= from_ms && *at < to_ms)
                    .map(|(_, p)| p.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn proof_count(&self, federation_id: &str) -> Result<u64> {
        let state = self.state()?;
        Ok(state
            .proofs
            .get(federation_id)
            .map(|r| r.len() as u64)
            .unwrap_or(0))
    }

    fn federations_with_proofs(&self) -> Result<Vec<String>> {
        Ok(self.state()?.proof_federations.clone())
    }
}

impl CycleStore for MemoryStore {
    fn save_cycle(&self, cycle: &AuditCycle) -> Result<()> {
        let mut state = self.state()?;
        if let Some(existing) = state.cycles.get(&cycle.cycle_number) {
            if existing.completed {
                return Err(StoreError::SealedCycle(cycle.cycle_number));
            }
        }
        state.cycles.insert(cycle.cycle_number, cycle.clone());
        Ok(())
    }

    fn load_cycles(&self) -> Result<Vec<AuditCycle>> {
        Ok(self.state()?.cycles.values().cloned().collect())
    }
}
