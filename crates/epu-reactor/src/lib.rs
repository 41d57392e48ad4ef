pub mod error;
pub mod reactor;

pub use error::{ReactorError, ReactorResult};
pub use reactor::{DomainConfigPatch, DomainDescription, EpumReactor, HeartbeatContent, InstanceStateContent};
