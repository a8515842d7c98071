//! Periodic audit driver.
//!
//! The scheduler is the only caller of `trigger` in a running node. Each tick
//! it opens the next cycle when due, submits every federation's proofs
//! recorded since the previous cycle started, and seals the cycle with their
//! total. A failed tick leaves the cycle collecting and is picked up again on
//! the next tick; roots that were already stored are not resubmitted.

use crate::coordinator::{AuditCoordinator, AuditError, Result};
use fedrelay_core::{Digest, ProofStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A cycle sealed by one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedCycle {
    pub cycle_number: u64,
    pub global_root: Digest,
    pub total_proofs: u64,
}

pub struct AuditScheduler {
    coordinator: Arc<AuditCoordinator>,
    proofs: Arc<dyn ProofStore>,
    poll_interval: Duration,
}

impl AuditScheduler {
    pub fn new(
        coordinator: Arc<AuditCoordinator>,
        proofs: Arc<dyn ProofStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            proofs,
            poll_interval,
        }
    }

    /// Trigger, collect and seal if a cycle is due or still open.
    pub fn tick(&self) -> Result<Option<SealedCycle>> {
        let cycle_number = self.coordinator.trigger()?;
        let cycle = self
            .coordinator
            .cycle(cycle_number)?
            .ok_or(AuditError::CycleNotFound(cycle_number))?;
        if cycle.completed {
            return Ok(None);
        }

        let (from, to) = self.coordinator.collection_window(cycle_number)?;

        let mut total = 0u64;
        for federation_id in self.proofs.federations_with_proofs()? {
            if let Some(stored) = cycle.federation_merkle_roots.get(&federation_id) {
                total += stored.leaf_count;
                continue;
            }

            let proofs = self.proofs.proofs_recorded_between(&federation_id, from, to)?;
            if proofs.is_empty() {
                continue;
            }
            self.coordinator
                .store_federation_root(cycle_number, &federation_id, &proofs)?;
            total += proofs.len() as u64;
        }

        debug!(cycle_number, from, to, total, "Cycle collection finished");
        let global_root = self.coordinator.complete_cycle(cycle_number, total)?;

        Ok(Some(SealedCycle {
            cycle_number,
            global_root,
            total_proofs: total,
        }))
    }

    /// Tick every poll interval until `shutdown` turns true.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                poll_interval_secs = self.poll_interval.as_secs(),
                "Audit scheduler started"
            );
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.tick() {
                            Ok(Some(sealed)) => {
                                info!(
                                    cycle_number = sealed.cycle_number,
                                    total_proofs = sealed.total_proofs,
                                    "Scheduled audit cycle sealed"
                                );
                            }
                            Ok(None) => {}
                            Err(e) => warn!(error = %e, "Audit tick failed, retrying next tick"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Audit scheduler stopped");
        })
    }
}

impl std::fmt::Debug for AuditScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditScheduler")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
