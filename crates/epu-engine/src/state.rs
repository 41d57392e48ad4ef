//! The immutable per-decide-cycle snapshot handed to a [`crate::DecisionEngine`].

use std::collections::HashMap;

use epu_core::types::{InstanceHealthState, InstanceState};

/// One instance as seen by the engine for the duration of a single
/// `decide`/`initialize` call.
#[derive(Debug, Clone)]
pub struct EngineInstance {
    pub instance_id: String,
    pub state: InstanceState,
    pub health: InstanceHealthState,
    pub extravars: HashMap<String, Option<String>>,
}

/// Immutable snapshot of a domain's instances, built fresh by the decider
/// before each `initialize`/`decide` call.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub instances: HashMap<String, EngineInstance>,
}

impl EngineState {
    pub fn new(instances: Vec<EngineInstance>) -> Self {
        Self {
            instances: instances.into_iter().map(|i| (i.instance_id.clone(), i)).collect(),
        }
    }

    /// Instances whose health is not OK (and not ZOMBIE — zombies are
    /// already past termination and have nothing left to destroy).
    pub fn get_unhealthy_instances(&self) -> Vec<&EngineInstance> {
        self.instances
            .values()
            .filter(|i| matches!(i.health, InstanceHealthState::Missing | InstanceHealthState::Error))
            .collect()
    }
}
