//! `epu-decider` — the periodic, leader-only decide-cycle driver for EPUM
//! domains (spec §4.5).
//!
//! Sits between `epu-store`/`epu-engine` (which it drives) and
//! `epu-core`'s `ProvisionerClient` (which it calls into to execute the
//! intents a decide cycle records).

pub mod decider;
pub mod error;

pub use decider::{Decider, LeaderPredicate};
pub use epu_core::EeRegistryTable;
pub use error::{DeciderError, DeciderResult};
