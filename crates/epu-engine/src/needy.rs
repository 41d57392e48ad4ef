//! `NeedyEngine` — the default decision engine policy (spec §4.3).
//!
//! A client (e.g. the process dispatcher) expresses its needs as
//! `preserve_n`; this engine's only job is converging the domain's valid
//! instance count to that target, destroying unhealthy instances first
//! and honoring `retirable_nodes` preference on scale-down.

use std::collections::{HashSet, VecDeque};

use epu_core::types::PropertyMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::control::Control;
use crate::engine::{DecisionEngine, EngineRunState};
use crate::error::{EngineError, EngineResult};
use crate::state::EngineState;

pub const CONF_PRESERVE_N: &str = "preserve_n";
pub const CONF_IAAS_SITE: &str = "iaas_site";
pub const CONF_IAAS_ALLOCATION: &str = "iaas_allocation";
pub const CONF_DEPLOYABLE_TYPE: &str = "deployable_type";
pub const CONF_RETIRABLE_NODES: &str = "retirable_nodes";
pub const CONF_UNIQUE_KEY: &str = "unique_key";
pub const CONF_UNIQUE_VALUES: &str = "unique_values";

pub struct NeedyEngine {
    preserve_n: u64,
    iaas_site: Option<String>,
    iaas_allocation: Option<String>,
    deployable_type: Option<String>,
    retirable_nodes: Vec<String>,
    unique_key: Option<String>,
    unique_values: Option<Vec<String>>,
    run_state: EngineRunState,
    rng: StdRng,

    pub initialize_count: u64,
    pub decide_count: u64,
    pub reconfigure_count: u64,
}

impl NeedyEngine {
    /// Production constructor: RNG seeded from entropy.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Test constructor: RNG seeded deterministically so destroy
    /// tie-break choices are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            preserve_n: 0,
            iaas_site: None,
            iaas_allocation: None,
            deployable_type: None,
            retirable_nodes: Vec::new(),
            unique_key: None,
            unique_values: None,
            run_state: EngineRunState::Pending,
            rng,
            initialize_count: 0,
            decide_count: 0,
            reconfigure_count: 0,
        }
    }

    fn set_conf(&mut self, newconf: &PropertyMap) -> EngineResult<()> {
        if newconf.is_empty() {
            return Err(EngineError::Configuration("requires engine conf".to_string()));
        }

        if let Some(v) = newconf.get(CONF_PRESERVE_N) {
            let n = v
                .as_i64()
                .ok_or_else(|| EngineError::Configuration(format!("{CONF_PRESERVE_N} must be an integer")))?;
            if n < 0 {
                return Err(EngineError::Configuration(format!(
                    "cannot have negative {CONF_PRESERVE_N} conf: {n}"
                )));
            }
            self.preserve_n = n as u64;
        }
        if let Some(v) = newconf.get(CONF_IAAS_SITE).and_then(|v| v.as_str()) {
            self.iaas_site = Some(v.to_string());
        }
        if let Some(v) = newconf.get(CONF_IAAS_ALLOCATION).and_then(|v| v.as_str()) {
            self.iaas_allocation = Some(v.to_string());
        }
        if let Some(v) = newconf.get(CONF_DEPLOYABLE_TYPE).and_then(|v| v.as_str()) {
            self.deployable_type = Some(v.to_string());
        }
        if let Some(v) = newconf.get(CONF_RETIRABLE_NODES).and_then(|v| v.as_array()) {
            self.retirable_nodes = v.iter().filter_map(|x| x.as_str().map(str::to_string)).collect();
        }

        if let Some(v) = newconf.get(CONF_UNIQUE_KEY).and_then(|v| v.as_str()) {
            self.unique_key = Some(v.to_string());
        }
        if let Some(raw) = newconf.get(CONF_UNIQUE_VALUES) {
            self.unique_values = match raw {
                serde_json::Value::String(s) => {
                    let trimmed = s.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed.split(',').map(|p| p.trim().to_string()).collect())
                    }
                }
                serde_json::Value::Array(items) => {
                    let parsed: Vec<String> = items.iter().filter_map(|x| x.as_str().map(str::to_string)).collect();
                    if parsed.is_empty() { None } else { Some(parsed) }
                }
                _ => None,
            };
        }

        Ok(())
    }

    fn launch_one(&self, control: &Control, extravars: Option<std::collections::HashMap<String, Option<String>>>) -> EngineResult<String> {
        let site = self
            .iaas_site
            .as_ref()
            .ok_or_else(|| EngineError::Configuration("no IaaS site configuration".to_string()))?;
        let allocation = self
            .iaas_allocation
            .as_ref()
            .ok_or_else(|| EngineError::Configuration("no IaaS allocation configuration".to_string()))?;
        let dt = self
            .deployable_type
            .as_ref()
            .ok_or_else(|| EngineError::Configuration("no deployable type configuration".to_string()))?;

        let (_, instance_ids) = control.launch(dt, site, allocation, extravars.clone());
        if instance_ids.len() != 1 {
            return Err(EngineError::Configuration("could not retrieve instance ID after launch".to_string()));
        }
        info!(instance_id = %instance_ids[0], ?extravars, "launched an instance");
        Ok(instance_ids[0].clone())
    }

    fn destroy_one(&self, control: &Control, instance_id: &str) {
        control.destroy_instances(vec![instance_id.to_string()]);
        info!(instance_id, "destroyed an instance");
    }
}

impl Default for NeedyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionEngine for NeedyEngine {
    fn initialize(&mut self, _control: &Control, _state: &EngineState, conf: Option<PropertyMap>) -> EngineResult<()> {
        if let Some(conf) = &conf {
            self.set_conf(conf)?;
        }
        info!("needy engine initialized");
        self.initialize_count += 1;
        Ok(())
    }

    fn decide(&mut self, control: &Control, state: &EngineState) -> EngineResult<()> {
        let mut valid_set: HashSet<String> = state
            .instances
            .values()
            .filter(|i| i.state.is_valid())
            .map(|i| i.instance_id.clone())
            .collect();

        for unhealthy in state.get_unhealthy_instances() {
            warn!(instance_id = %unhealthy.instance_id, "terminating unhealthy node");
            self.destroy_one(control, &unhealthy.instance_id);
            valid_set.remove(&unhealthy.instance_id);
        }

        let mut valid_uniques_set: HashSet<String> = HashSet::new();
        if let Some(key) = &self.unique_key {
            for id in &valid_set {
                if let Some(inst) = state.instances.get(id) {
                    if let Some(Some(value)) = inst.extravars.get(key) {
                        valid_uniques_set.insert(value.clone());
                    }
                }
            }
        }

        let mut valid_count = valid_set.len() as u64;
        let mut force_pending = true;

        if valid_count == self.preserve_n {
            debug!(valid_count, target = self.preserve_n, "valid count = target");
            force_pending = false;
        } else if valid_count < self.preserve_n {
            debug!(valid_count, target = self.preserve_n, "valid count < target");

            let mut next_uniques: Option<VecDeque<String>> = self.unique_key.as_ref().map(|_| {
                self.unique_values
                    .as_ref()
                    .map(|vs| vs.iter().filter(|v| !valid_uniques_set.contains(*v)).cloned().collect())
                    .unwrap_or_default()
            });

            while valid_count < self.preserve_n {
                let extravars = self.unique_key.as_ref().map(|key| {
                    let value = next_uniques.as_mut().and_then(VecDeque::pop_front);
                    [(key.clone(), value)].into_iter().collect()
                });
                let instance_id = self.launch_one(control, extravars.clone())?;
                valid_set.insert(instance_id);
                valid_count += 1;
            }
        } else {
            debug!(valid_count, target = self.preserve_n, "valid count > target");
            while valid_count > self.preserve_n {
                let die_id = self
                    .retirable_nodes
                    .iter()
                    .find(|id| valid_set.contains(*id))
                    .cloned()
                    .or_else(|| {
                        let candidates: Vec<&String> = valid_set.iter().collect();
                        candidates.choose(&mut self.rng).map(|s| (*s).clone())
                    });
                let Some(die_id) = die_id else { break };
                self.destroy_one(control, &die_id);
                valid_set.remove(&die_id);
                valid_count -= 1;
            }
        }

        self.run_state = if force_pending {
            EngineRunState::Pending
        } else {
            EngineRunState::Stable
        };
        self.decide_count += 1;
        Ok(())
    }

    fn reconfigure(&mut self, _control: &Control, newconf: PropertyMap) -> EngineResult<()> {
        self.set_conf(&newconf)?;
        info!("needy engine reconfigured");
        self.reconfigure_count += 1;
        Ok(())
    }

    fn run_state(&self) -> EngineRunState {
        self.run_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EngineInstance;
    use epu_core::types::{InstanceHealthState, InstanceState};
    use std::collections::HashMap;

    fn conf(pairs: &[(&str, serde_json::Value)]) -> PropertyMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn take_launches(control: &Control) -> Vec<(String, String, String)> {
        control
            .take_intents()
            .into_iter()
            .filter_map(|i| match i {
                crate::control::Intent::Launch {
                    deployable_type,
                    site,
                    allocation,
                    ..
                } => Some((deployable_type, site, allocation)),
                _ => None,
            })
            .collect()
    }

    fn base_conf() -> PropertyMap {
        conf(&[
            (CONF_PRESERVE_N, serde_json::json!(2)),
            (CONF_IAAS_SITE, serde_json::json!("s1")),
            (CONF_IAAS_ALLOCATION, serde_json::json!("a1")),
            (CONF_DEPLOYABLE_TYPE, serde_json::json!("dt1")),
        ])
    }

    #[test]
    fn startup_launches_to_preserve_n() {
        let mut engine = NeedyEngine::with_seed(1);
        let control = Control::new();
        engine.initialize(&control, &EngineState::default(), Some(base_conf())).unwrap();
        control.take_intents();

        engine.decide(&control, &EngineState::default()).unwrap();
        let launches = take_launches(&control);
        assert_eq!(launches.len(), 2);
        assert!(launches.iter().all(|(dt, site, alloc)| dt == "dt1" && site == "s1" && alloc == "a1"));
        assert_eq!(engine.run_state(), EngineRunState::Pending);
    }

    #[test]
    fn stable_when_valid_count_matches_target() {
        let mut engine = NeedyEngine::with_seed(1);
        let control = Control::new();
        engine.initialize(&control, &EngineState::default(), Some(base_conf())).unwrap();
        control.take_intents();

        let state = EngineState::new(vec![
            EngineInstance {
                instance_id: "i1".to_string(),
                state: InstanceState::Running,
                health: InstanceHealthState::Ok,
                extravars: HashMap::new(),
            },
            EngineInstance {
                instance_id: "i2".to_string(),
                state: InstanceState::Running,
                health: InstanceHealthState::Ok,
                extravars: HashMap::new(),
            },
        ]);
        engine.decide(&control, &state).unwrap();
        assert!(control.take_intents().is_empty());
        assert_eq!(engine.run_state(), EngineRunState::Stable);
    }

    #[test]
    fn unique_values_assigned_then_exhausted_fall_back_to_null() {
        let mut engine = NeedyEngine::with_seed(1);
        let control = Control::new();
        let mut c = base_conf();
        c.insert(CONF_UNIQUE_KEY.to_string(), serde_json::json!("slot"));
        c.insert(CONF_UNIQUE_VALUES.to_string(), serde_json::json!("A,B,C"));
        engine.initialize(&control, &EngineState::default(), Some(c)).unwrap();
        control.take_intents();

        engine.decide(&control, &EngineState::default()).unwrap();
        let intents = control.take_intents();
        let mut slots: Vec<Option<String>> = intents
            .into_iter()
            .filter_map(|i| match i {
                crate::control::Intent::Launch { extravars, .. } => {
                    Some(extravars.and_then(|v| v.get("slot").cloned().flatten()))
                }
                _ => None,
            })
            .collect();
        slots.sort();
        assert_eq!(slots, vec![Some("A".to_string()), Some("B".to_string())]);

        // Reconfigure preserve_n up to 4: two more, "C" then null.
        engine
            .reconfigure(&control, conf(&[(CONF_PRESERVE_N, serde_json::json!(4))]))
            .unwrap();

        let mut existing = HashMap::new();
        existing.insert("slot".to_string(), Some("A".to_string()));
        let state = EngineState::new(vec![
            EngineInstance {
                instance_id: "i1".to_string(),
                state: InstanceState::Running,
                health: InstanceHealthState::Ok,
                extravars: existing.clone(),
            },
            EngineInstance {
                instance_id: "i2".to_string(),
                state: InstanceState::Running,
                health: InstanceHealthState::Ok,
                extravars: {
                    let mut m = HashMap::new();
                    m.insert("slot".to_string(), Some("B".to_string()));
                    m
                },
            },
        ]);
        engine.decide(&control, &state).unwrap();
        let intents = control.take_intents();
        let mut slots: Vec<Option<String>> = intents
            .into_iter()
            .filter_map(|i| match i {
                crate::control::Intent::Launch { extravars, .. } => {
                    Some(extravars.and_then(|v| v.get("slot").cloned().flatten()))
                }
                _ => None,
            })
            .collect();
        slots.sort();
        assert_eq!(slots, vec![None, Some("C".to_string())]);
    }

    #[test]
    fn retire_preference_destroys_listed_node_first() {
        let mut engine = NeedyEngine::with_seed(1);
        let control = Control::new();
        let mut c = base_conf();
        c.insert(CONF_RETIRABLE_NODES.to_string(), serde_json::json!(["i2"]));
        engine.initialize(&control, &EngineState::default(), Some(c)).unwrap();
        control.take_intents();

        let state = EngineState::new(vec![
            EngineInstance {
                instance_id: "i1".to_string(),
                state: InstanceState::Running,
                health: InstanceHealthState::Ok,
                extravars: HashMap::new(),
            },
            EngineInstance {
                instance_id: "i2".to_string(),
                state: InstanceState::Running,
                health: InstanceHealthState::Ok,
                extravars: HashMap::new(),
            },
            EngineInstance {
                instance_id: "i3".to_string(),
                state: InstanceState::Running,
                health: InstanceHealthState::Ok,
                extravars: HashMap::new(),
            },
        ]);
        engine.decide(&control, &state).unwrap();
        let destroyed: Vec<String> = control
            .take_intents()
            .into_iter()
            .flat_map(|i| match i {
                crate::control::Intent::Destroy { instance_ids } => instance_ids,
                _ => vec![],
            })
            .collect();
        assert_eq!(destroyed, vec!["i2".to_string()]);
    }

    #[test]
    fn unhealthy_instances_destroyed_unconditionally() {
        let mut engine = NeedyEngine::with_seed(1);
        let control = Control::new();
        engine.initialize(&control, &EngineState::default(), Some(base_conf())).unwrap();
        control.take_intents();

        let state = EngineState::new(vec![
            EngineInstance {
                instance_id: "i1".to_string(),
                state: InstanceState::Running,
                health: InstanceHealthState::Ok,
                extravars: HashMap::new(),
            },
            EngineInstance {
                instance_id: "i2".to_string(),
                state: InstanceState::Terminating,
                health: InstanceHealthState::Error,
                extravars: HashMap::new(),
            },
        ]);
        engine.decide(&control, &state).unwrap();
        let destroyed: Vec<String> = control
            .take_intents()
            .into_iter()
            .flat_map(|i| match i {
                crate::control::Intent::Destroy { instance_ids } => instance_ids,
                _ => vec![],
            })
            .collect();
        // i2 is already terminating but still gets an (idempotent) destroy request.
        assert!(destroyed.contains(&"i2".to_string()));
    }

    #[test]
    fn negative_preserve_n_is_configuration_error() {
        let mut engine = NeedyEngine::with_seed(1);
        let control = Control::new();
        let err = engine
            .initialize(&control, &EngineState::default(), Some(conf(&[(CONF_PRESERVE_N, serde_json::json!(-1))])))
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn reconfigure_with_empty_conf_is_error() {
        let mut engine = NeedyEngine::with_seed(1);
        let control = Control::new();
        let err = engine.reconfigure(&control, PropertyMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn preserve_n_zero_destroys_all() {
        let mut engine = NeedyEngine::with_seed(1);
        let control = Control::new();
        engine
            .initialize(
                &control,
                &EngineState::default(),
                Some(conf(&[(CONF_PRESERVE_N, serde_json::json!(0))])),
            )
            .unwrap();
        control.take_intents();

        let state = EngineState::new(vec![EngineInstance {
            instance_id: "i1".to_string(),
            state: InstanceState::Running,
            health: InstanceHealthState::Ok,
            extravars: HashMap::new(),
        }]);
        engine.decide(&control, &state).unwrap();
        let destroyed: Vec<String> = control
            .take_intents()
            .into_iter()
            .flat_map(|i| match i {
                crate::control::Intent::Destroy { instance_ids } => instance_ids,
                _ => vec![],
            })
            .collect();
        assert_eq!(destroyed, vec!["i1".to_string()]);
    }
}
