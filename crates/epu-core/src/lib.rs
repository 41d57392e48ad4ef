//! Shared types, configuration, error classification, and external client
//! interfaces for the EPUM/PDC control plane.
//!
//! # Architecture
//!
//! `epu-core` sits at the bottom of the dependency graph: `epu-store`,
//! `epu-engine`, `epu-reactor`, `epu-decider`, `epu-notify`, and
//! `epu-dispatch` all depend on it for the enums, config shape, and the
//! boxed-future client traits that cross the I/O boundary (spec §6).

pub mod clients;
pub mod config;
pub mod error;
pub mod registry;
pub mod types;

pub use clients::{
    BoxFuture, EeAgentClient, EpumClient, LoggingEeAgent, LoggingEpumClient, LoggingProvisioner,
    LoggingSubscriberSink, NotifyPayload, ProvisionerClient, SubscriberSink,
};
pub use config::DaemonConfig;
pub use error::ErrorKind;
pub use registry::EeRegistryTable;
pub use types::{
    classify_for_notify, DeployableType, EngineSpec, ErrorRecord, InstanceHealthState,
    InstanceState, ProcessState, PropertyMap, ReducedState,
};
