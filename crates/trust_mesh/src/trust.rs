//! Trust Scoring Module
//!
//! Computes a node's trust score from its observed metrics and applies it to
//! the registry. The score is a weighted sum:
//!
//! | component      | input                                       | weight |
//! |----------------|---------------------------------------------|--------|
//! | uptime         | `uptime_percentage / 100`                   | 0.40   |
//! | proof success  | `proof_success_rate`                        | 0.35   |
//! | latency        | `clamp(1 - avg_latency_ms / ceiling, 0, 1)` | 0.15   |
//! | stake          | `min(stake_amount / reference, 1)`          | 0.10   |
//!
//! clamped to [0, 1] and scaled by `SCORE_SCALE`.

use crate::registry::{NodeRegistry, RegistryError};
use fedrelay_core::config::TrustSection;
use fedrelay_core::event::{event_types, EventCategory, EventSeverity};
use fedrelay_core::{NodeMetrics, NodeStatus, SCORE_SCALE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const UPTIME_WEIGHT: f64 = 0.40;
pub const PROOF_SUCCESS_WEIGHT: f64 = 0.35;
pub const LATENCY_WEIGHT: f64 = 0.15;
pub const STAKE_WEIGHT: f64 = 0.10;

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Registry(RegistryError),
}

impl From<RegistryError> for TrustError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(id) => TrustError::NotFound(id),
            other => TrustError::Registry(other),
        }
    }
}

/// Outcome of one score update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustUpdate {
    pub node_id: String,
    pub previous_score: u64,
    pub score: u64,
    pub previous_status: NodeStatus,
    pub status: NodeStatus,
}

impl TrustUpdate {
    /// Active before, inactive after
    pub fn deactivated(&self) -> bool {
        self.previous_status == NodeStatus::Active && self.status == NodeStatus::Inactive
    }

    pub fn reactivated(&self) -> bool {
        self.previous_status == NodeStatus::Inactive && self.status == NodeStatus::Active
    }
}

#[derive(Debug, Clone)]
pub struct TrustScoreEngine {
    latency_ceiling_ms: u64,
    stake_reference: u64,
}

impl TrustScoreEngine {
    pub fn new(config: &TrustSection) -> Self {
        Self {
            latency_ceiling_ms: config.latency_ceiling_ms.max(1),
            stake_reference: config.stake_reference.max(1),
        }
    }

    /// Fixed-point score in `[0, SCORE_SCALE]`
    pub fn calculate(&self, metrics: &NodeMetrics) -> u64 {
        let uptime = unit(metrics.uptime_percentage / 100.0);
        let success = unit(metrics.proof_success_rate);
        let latency = unit(1.0 - metrics.avg_latency_ms as f64 / self.latency_ceiling_ms as f64);
        let stake = unit(metrics.stake_amount as f64 / self.stake_reference as f64);

        let sum = uptime * UPTIME_WEIGHT
            + success * PROOF_SUCCESS_WEIGHT
            + latency * LATENCY_WEIGHT
            + stake * STAKE_WEIGHT;

        (unit(sum) * SCORE_SCALE as f64).round() as u64
    }

    /// Recompute and write a node's score; status follows the threshold.
    ///
    /// The score, metrics and status are written together under the node's
    /// lock. A node that was administratively suspended stays inactive.
    pub fn update(
        &self,
        registry: &NodeRegistry,
        node_id: &str,
        metrics: &NodeMetrics,
    ) -> Result<TrustUpdate, TrustError> {
        let score = self.calculate(metrics);
        let threshold = registry.min_trust_score();
        let now = registry.now_ms();

        let (_, update) = registry.update_with(node_id, |node| {
            let previous_score = node.trust_score;
            let previous_status = node.status;

            node.trust_score = score;
            node.uptime_percentage = metrics.uptime_percentage;
            node.proof_success_rate = metrics.proof_success_rate;
            node.avg_latency_ms = metrics.avg_latency_ms;
            node.stake_amount = metrics.stake_amount;
            node.last_updated = now;
            node.status = if score >= threshold && !node.administratively_suspended {
                NodeStatus::Active
            } else {
                NodeStatus::Inactive
            };

            Ok(TrustUpdate {
                node_id: node.node_id.clone(),
                previous_score,
                score,
                previous_status,
                status: node.status,
            })
        })?;

        debug!(
            federation_id = %registry.federation_id(),
            node_id = %node_id,
            previous_score = update.previous_score,
            score,
            "Trust score updated"
        );
        registry.publish(
            registry
                .event(event_types::TRUST_UPDATED, node_id)
                .category(EventCategory::Trust)
                .message("trust score recomputed")
                .metadata("previous_score", update.previous_score)
                .metadata("trust_score", score)
                .build(),
        );

        if update.deactivated() {
            warn!(
                federation_id = %registry.federation_id(),
                node_id = %node_id,
                score,
                threshold,
                "Node deactivated: trust score below threshold"
            );
            registry.publish(
                registry
                    .event(event_types::NODE_DEACTIVATED, node_id)
                    .category(EventCategory::Trust)
                    .severity(EventSeverity::Warning)
                    .message("trust score fell below threshold")
                    .metadata("trust_score", score)
                    .metadata("threshold", threshold)
                    .build(),
            );
        } else if update.reactivated() {
            info!(
                federation_id = %registry.federation_id(),
                node_id = %node_id,
                score,
                "Node reactivated: trust score recovered"
            );
            registry.publish(
                registry
                    .event(event_types::NODE_REACTIVATED, node_id)
                    .category(EventCategory::Trust)
                    .message("trust score recovered")
                    .metadata("trust_score", score)
                    .build(),
            );
        }

        Ok(update)
    }
}

impl Default for TrustScoreEngine {
    fn default() -> Self {
        Self::new(&TrustSection::default())
    }
}

/// Clamp to [0, 1]; NaN counts as 0
fn unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
