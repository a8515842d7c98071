//! Scheduled trust recomputation.
//!
//! Every `update_interval` the updater asks a [`MetricsSource`] for the latest
//! observations of every registered node and feeds them to the
//! [`TrustScoreEngine`]. A failing node is logged and skipped; it never stops
//! the sweep.

use crate::registry::NodeRegistry;
use crate::trust::TrustScoreEngine;
use async_trait::async_trait;
use fedrelay_core::NodeMetrics;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Supplier of observed node metrics (monitoring, telemetry import)
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Latest metrics for a node, or `None` if nothing new was observed
    async fn metrics(&self, federation_id: &str, node_id: &str) -> Option<NodeMetrics>;
}

/// Metrics pushed in by the embedding application
#[derive(Debug, Default)]
pub struct StaticMetricsSource {
    observations: RwLock<HashMap<(String, String), NodeMetrics>>,
}

impl StaticMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, federation_id: &str, node_id: &str, metrics: NodeMetrics) {
        if let Ok(mut observations) = self.observations.write() {
            observations.insert((federation_id.to_string(), node_id.to_string()), metrics);
        }
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn metrics(&self, federation_id: &str, node_id: &str) -> Option<NodeMetrics> {
        let observations = self.observations.read().ok()?;
        observations
            .get(&(federation_id.to_string(), node_id.to_string()))
            .copied()
    }
}

/// The set of registries the updater sweeps
pub trait RegistryProvider: Send + Sync {
    fn registries(&self) -> Vec<Arc<NodeRegistry>>;
}

impl RegistryProvider for Vec<Arc<NodeRegistry>> {
    fn registries(&self) -> Vec<Arc<NodeRegistry>> {
        self.clone()
    }
}

/// Counters for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub updated: usize,
    pub deactivated: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct TrustUpdater {
    engine: TrustScoreEngine,
    registries: Arc<dyn RegistryProvider>,
    source: Arc<dyn MetricsSource>,
    interval: Duration,
}

impl TrustUpdater {
    pub fn new(
        engine: TrustScoreEngine,
        registries: Arc<dyn RegistryProvider>,
        source: Arc<dyn MetricsSource>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            registries,
            source,
            interval,
        }
    }

    /// One sweep over every node of every registry
    pub async fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for registry in self.registries.registries() {
            let nodes = match registry.list_nodes() {
                Ok(nodes) => nodes,
                Err(e) => {
                    warn!(federation_id = %registry.federation_id(), error = %e, "Cannot list nodes");
                    report.failed += 1;
                    continue;
                }
            };

            for node in nodes {
                let Some(metrics) = self.source.metrics(&node.federation_id, &node.node_id).await
                else {
                    report.skipped += 1;
                    continue;
                };

                match self.engine.update(&registry, &node.node_id, &metrics) {
                    Ok(update) => {
                        report.updated += 1;
                        if update.deactivated() {
                            report.deactivated += 1;
                        }
                    }
                    Err(e) => {
                        warn!(
                            federation_id = %node.federation_id,
                            node_id = %node.node_id,
                            error = %e,
                            "Trust update failed"
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        debug!(?report, "Trust sweep finished");
        report
    }

    /// Run sweeps every interval until `shutdown` turns true.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Trust updater started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Trust updater stopped");
        })
    }
}
