//! Engine-by-name registry. The EE Registry (spec §4.8) names a
//! `deployable_type`; this registry names a decision-engine *class*, so a
//! domain's config can select "needy" (or, in the future, another
//! policy) by string without the store or reactor knowing about concrete
//! engine types.

use std::collections::HashMap;

use crate::engine::DecisionEngine;
use crate::error::{EngineError, EngineResult};
use crate::needy::NeedyEngine;

pub const NEEDY_ENGINE: &str = "needy";

type EngineFactory = fn() -> Box<dyn DecisionEngine>;

pub struct EngineRegistry {
    factories: HashMap<&'static str, EngineFactory>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        let mut factories: HashMap<&'static str, EngineFactory> = HashMap::new();
        factories.insert(NEEDY_ENGINE, || Box::new(NeedyEngine::new()));
        Self { factories }
    }

    pub fn create(&self, name: &str) -> EngineResult<Box<dyn DecisionEngine>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| EngineError::NotFound(format!("no decision engine registered under '{name}'")))?;
        Ok(factory())
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_needy_engine_by_name() {
        let registry = EngineRegistry::new();
        assert!(registry.create(NEEDY_ENGINE).is_ok());
    }

    #[test]
    fn unknown_engine_name_is_not_found() {
        let registry = EngineRegistry::new();
        assert!(matches!(registry.create("bogus"), Err(EngineError::NotFound(_))));
    }
}
