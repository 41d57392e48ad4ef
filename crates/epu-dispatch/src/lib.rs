//! `epu-dispatch` — the Process Dispatcher Core: process/resource/node
//! tables and matchmaking (spec §4.6).
//!
//! Sits alongside `epu-reactor`/`epu-decider` as a peer subsystem: where
//! those drive EPUM instance convergence, `Dispatcher` here drives PDC
//! process placement onto the execution engines those instances run.

pub mod dispatcher;
pub mod error;
pub mod types;

pub use dispatcher::{Dispatcher, DispatcherSnapshot};
pub use error::{DispatchError, DispatchResult};
pub use types::{
    DeployedNode, EeHeartbeat, ExecutionEngineResource, ProcessHeartbeatEntry, ProcessRecord,
    Queue, WireProcessState,
};
