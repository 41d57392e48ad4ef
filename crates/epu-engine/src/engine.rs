//! The decision engine contract (spec §4.2).

use epu_core::types::PropertyMap;

use crate::control::Control;
use crate::error::EngineResult;
use crate::state::EngineState;

/// Whether a domain's engine considers itself converged. The decider
/// uses this to decide how soon to schedule the next `decide` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineRunState {
    Pending,
    Stable,
}

/// A per-domain policy object. Implementations are plain structs, not
/// `async_trait` — all I/O happens through `control`, which only
/// records intents during the call (see [`crate::control::Control`]).
///
/// Caller guarantees: `initialize` precedes `decide`/`reconfigure`;
/// `decide` and `reconfigure` are mutually exclusive and never
/// concurrent with themselves; `state` is immutable for the call's
/// duration.
pub trait DecisionEngine: Send {
    fn initialize(&mut self, control: &Control, state: &EngineState, conf: Option<PropertyMap>) -> EngineResult<()>;

    fn decide(&mut self, control: &Control, state: &EngineState) -> EngineResult<()>;

    fn reconfigure(&mut self, control: &Control, newconf: PropertyMap) -> EngineResult<()>;

    /// Pending vs. stable, per the last `decide` call.
    fn run_state(&self) -> EngineRunState;
}
