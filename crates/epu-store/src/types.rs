//! Persisted domain and instance record shapes (spec §3).

use std::collections::HashMap;

use epu_core::{ErrorRecord, InstanceHealthState, InstanceState, PropertyMap};
use serde::{Deserialize, Serialize};

/// A (name, op) pair a domain notifies on instance-state transitions.
pub type Subscriber = (String, String);

/// The three additively-reconfigurable config sections of a domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainConfig {
    #[serde(default)]
    pub general: PropertyMap,
    #[serde(default)]
    pub engine: PropertyMap,
    #[serde(default)]
    pub health: PropertyMap,
}

impl DomainConfig {
    /// Additive merge: keys in `patch` replace, keys absent from `patch`
    /// are left untouched.
    fn merge_section(section: &mut PropertyMap, patch: PropertyMap) {
        for (k, v) in patch {
            section.insert(k, v);
        }
    }

    pub fn merge_general(&mut self, patch: PropertyMap) {
        Self::merge_section(&mut self.general, patch);
    }

    pub fn merge_engine(&mut self, patch: PropertyMap) {
        Self::merge_section(&mut self.engine, patch);
    }

    pub fn merge_health(&mut self, patch: PropertyMap) {
        Self::merge_section(&mut self.health, patch);
    }

    /// `health` is considered enabled unless explicitly disabled via
    /// `{"enabled": false}`.
    pub fn is_health_enabled(&self) -> bool {
        !matches!(self.health.get("enabled"), Some(v) if v == &serde_json::json!(false))
    }
}

/// A persisted domain row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRecord {
    pub owner: String,
    pub domain_id: String,
    pub config: DomainConfig,
    pub subscribers: Vec<Subscriber>,
    /// Bumped on every config/subscriber mutation; backs the
    /// compare-and-set semantics called for in spec §5.
    pub version: u64,
}

impl DomainRecord {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.owner, self.domain_id)
    }

    pub fn key_for(owner: &str, domain_id: &str) -> String {
        format!("{owner}/{domain_id}")
    }
}

/// A persisted instance row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub owner: String,
    pub domain_id: String,
    pub site: Option<String>,
    pub allocation: Option<String>,
    pub deployable_type: String,
    pub state: InstanceState,
    pub health: InstanceHealthState,
    #[serde(default)]
    pub extravars: HashMap<String, Option<String>>,
    pub launch_id: Option<String>,
    pub last_heartbeat_time: Option<u64>,
    pub error_time: Option<u64>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
}

impl InstanceRecord {
    /// Attempt to move `state` forward. Returns `false` (no-op) if the
    /// requested state is not strictly greater than the current one —
    /// `Instance.state` is monotone non-decreasing.
    pub fn advance_state(&mut self, new_state: InstanceState) -> bool {
        if new_state > self.state {
            self.state = new_state;
            true
        } else {
            false
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(
            self.health,
            InstanceHealthState::Missing | InstanceHealthState::Error
        )
    }
}
