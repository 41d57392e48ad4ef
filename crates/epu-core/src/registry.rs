//! EE Registry (spec §4.8) — static deployable-type → engine-spec table.
//!
//! Loaded once from `[[ee_registry]]` config entries at daemon startup and
//! held read-only for the process lifetime. Both the decider (to build
//! `Instance.extravars`/launch defaults indirectly through domain config)
//! and the dispatcher (to size a newly heartbeating EE resource) consult
//! the same table, so it lives here rather than in either crate.

use std::collections::HashMap;

use crate::types::EngineSpec;

#[derive(Debug, Clone, Default)]
pub struct EeRegistryTable {
    specs: HashMap<String, EngineSpec>,
}

impl EeRegistryTable {
    pub fn new(specs: Vec<EngineSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.deployable_type.clone(), s)).collect(),
        }
    }

    pub fn get(&self, deployable_type: &str) -> Option<&EngineSpec> {
        self.specs.get(deployable_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EngineSpec> {
        self.specs.values()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dt: &str, slots: u32, base_need: u32) -> EngineSpec {
        EngineSpec {
            deployable_type: dt.to_string(),
            engine_id: format!("{dt}-ee"),
            slots,
            base_need,
        }
    }

    #[test]
    fn looks_up_by_deployable_type() {
        let table = EeRegistryTable::new(vec![spec("worker", 4, 1), spec("gpu", 1, 0)]);
        assert_eq!(table.get("worker").unwrap().slots, 4);
        assert_eq!(table.get("gpu").unwrap().base_need, 0);
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn iter_visits_every_entry() {
        let table = EeRegistryTable::new(vec![spec("worker", 4, 1), spec("gpu", 1, 0)]);
        assert_eq!(table.iter().count(), 2);
        assert_eq!(table.len(), 2);
        assert!(!table.is_empty());
    }
}
