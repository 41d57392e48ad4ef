pub mod control;
pub mod engine;
pub mod error;
pub mod needy;
pub mod registry;
pub mod state;

pub use control::{Control, Intent};
pub use engine::{DecisionEngine, EngineRunState};
pub use error::{EngineError, EngineResult};
pub use needy::NeedyEngine;
pub use registry::EngineRegistry;
pub use state::{EngineInstance, EngineState};
