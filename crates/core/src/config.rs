//! Configuration management for FedRelay.

use crate::error::{CoreError, Result};
use crate::types::{MIN_TRUST_SCORE, RELAY_MIN_TRUST, SCORE_SCALE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub node: NodeSection,
    pub trust: TrustSection,
    pub relay: RelaySection,
    pub audit: AuditSection,
    pub policy: PolicySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory holding the SQLite database
    pub data_dir: PathBuf,
    /// "pretty" or "json"
    pub log_format: String,
    /// Identifier of the audit coordinator allowed to seal cycles
    pub coordinator_id: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            log_format: "pretty".to_string(),
            coordinator_id: "coordinator-001".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustSection {
    pub min_trust_score: u64,
    pub relay_min_trust: u64,
    /// Latency at or above which the latency component is zero
    pub latency_ceiling_ms: u64,
    /// Stake at or above which the stake component saturates
    pub stake_reference: u64,
    pub update_interval_secs: u64,
}

impl Default for TrustSection {
    fn default() -> Self {
        Self {
            min_trust_score: MIN_TRUST_SCORE,
            relay_min_trust: RELAY_MIN_TRUST,
            latency_ceiling_ms: 500,
            stake_reference: 500_000,
            update_interval_secs: 300,
        }
    }
}

impl TrustSection {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub policy_timeout_ms: u64,
    /// Nonce retention window per target federation
    pub replay_window_secs: u64,
    /// Maximum remembered nonces per target federation
    pub replay_capacity: usize,
    pub max_clock_skew_secs: u64,
    pub eviction_interval_secs: u64,
    /// Payload fields that may contribute to a proof digest
    pub payload_allow_list: Vec<String>,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            policy_timeout_ms: 2_000,
            replay_window_secs: 86_400,
            replay_capacity: 100_000,
            max_clock_skew_secs: 300,
            eviction_interval_secs: 60,
            payload_allow_list: [
                "claim_type",
                "subject_ref",
                "content_hash",
                "amount",
                "currency",
                "issued_at",
                "jurisdiction",
                "reference",
                "status",
                "version",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl RelaySection {
    pub fn policy_timeout(&self) -> Duration {
        Duration::from_millis(self.policy_timeout_ms)
    }

    pub fn replay_window(&self) -> Duration {
        Duration::from_secs(self.replay_window_secs)
    }

    pub fn max_clock_skew(&self) -> Duration {
        Duration::from_secs(self.max_clock_skew_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    pub cycle_interval_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 86_400,
            poll_interval_secs: 60,
        }
    }
}

impl AuditSection {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// Personal-data field names refused in metadata and payloads
    pub disallowed_fields: Vec<String>,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            disallowed_fields: [
                "email",
                "phone",
                "ssn",
                "name",
                "full_name",
                "address",
                "date_of_birth",
                "dob",
                "passport_number",
                "national_id",
                "ip_address",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl RelayConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let trust = &self.trust;
        if trust.min_trust_score > SCORE_SCALE || trust.relay_min_trust > SCORE_SCALE {
            return Err(CoreError::Config(format!(
                "trust thresholds must be within [0, {}]",
                SCORE_SCALE
            )));
        }
        if trust.relay_min_trust < trust.min_trust_score {
            return Err(CoreError::Config(
                "relay_min_trust must not be below min_trust_score".to_string(),
            ));
        }
        if trust.latency_ceiling_ms == 0 || trust.stake_reference == 0 {
            return Err(CoreError::Config(
                "latency_ceiling_ms and stake_reference must be positive".to_string(),
            ));
        }
        if trust.update_interval_secs == 0
            || self.audit.cycle_interval_secs == 0
            || self.audit.poll_interval_secs == 0
            || self.relay.eviction_interval_secs == 0
            || self.relay.replay_window_secs == 0
        {
            return Err(CoreError::Config("intervals must be positive".to_string()));
        }
        if self.relay.replay_capacity == 0 {
            return Err(CoreError::Config(
                "replay_capacity must be positive".to_string(),
            ));
        }
        if !matches!(self.node.log_format.as_str(), "pretty" | "json") {
            return Err(CoreError::Config(format!(
                "unknown log_format: {}",
                self.node.log_format
            )));
        }
        Ok(())
    }
}
