//! `epu-store` — redb-backed domain and instance persistence for EPUM.
//!
//! One `TableDefinition` per logical collection (domains, instances, the
//! reverse instance→domain index), composite string keys, a single
//! transaction per operation — no transaction spans a suspension point.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::EpumStore;
pub use types::{DomainConfig, DomainRecord, InstanceRecord, Subscriber};
