//! External collaborator interfaces (spec §6).
//!
//! The provisioner, EE agent, EPUM, and subscriber-sink clients are the
//! system's I/O boundary: real implementations talk to a provisioner
//! service, EE agents, the EPUM message bus, and subscriber transports
//! respectively. None of that transport is in scope here (spec §1) — only
//! the trait shape and a logging no-op implementation of each, suitable
//! for standalone operation and tests.
//!
//! None of these traits use `async_trait`. Every method returns a boxed
//! future instead, the same pattern the autoscaler's `ScaleCallback` and
//! the health monitor's `HealthCallback` already use for a single
//! callback field, generalized here to full multi-method client traits.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::types::{PropertyMap, ReducedState};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Consumed by `Control` to apply the effects an engine's `decide`/
/// `reconfigure` call requested.
pub trait ProvisionerClient: Send + Sync {
    fn provision(
        &self,
        launch_id: &str,
        instance_ids: &[String],
        dt: &str,
        site: &str,
        allocation: Option<&str>,
        vars: Option<PropertyMap>,
    ) -> BoxFuture<'_, ()>;

    fn terminate_nodes(&self, node_ids: &[String]) -> BoxFuture<'_, ()>;

    fn terminate_all(&self) -> BoxFuture<'_, ()>;
}

/// Consumed by the PDC to drive execution engines.
pub trait EeAgentClient: Send + Sync {
    fn launch_process(
        &self,
        ee_id: &str,
        upid: &str,
        round: u64,
        run_type: &str,
        parameters: serde_json::Value,
    ) -> BoxFuture<'_, ()>;

    fn terminate_process(&self, ee_id: &str, upid: &str, round: u64) -> BoxFuture<'_, ()>;

    fn cleanup_process(&self, ee_id: &str, upid: &str, round: u64) -> BoxFuture<'_, ()>;
}

/// Consumed by the PDC to register need with EPUM and by operators to
/// drive domain lifecycle from outside the reactor's own API.
pub trait EpumClient: Send + Sync {
    fn register_need(
        &self,
        dt: &str,
        constraints: Option<PropertyMap>,
        count: u32,
        subscriber_name: &str,
        subscriber_op: &str,
    ) -> BoxFuture<'_, ()>;

    fn retire_node(&self, node_id: &str) -> BoxFuture<'_, ()>;
}

/// Payload delivered to a subscriber for an observable instance-state
/// transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyPayload {
    pub domain_id: String,
    pub instance_id: String,
    pub state: ReducedState,
    pub site: Option<String>,
    pub allocation: Option<String>,
    pub deployable_type: String,
}

/// Transport-agnostic subscriber fan-out sink (spec §4.7).
///
/// The payload is a plain JSON value rather than [`NotifyPayload`] so the
/// same sink serves both EPUM instance-state subscribers (§4.7) and PDC
/// process-state subscribers (§4.6, §7): each builds its own structured
/// payload type and serializes it at the call site.
pub trait SubscriberSink: Send + Sync {
    fn notify_by_name(&self, name: &str, op: &str, payload: serde_json::Value) -> BoxFuture<'_, ()>;
}

/// Logs every call and succeeds; the default for standalone operation
/// without a real provisioner/EE-agent/EPUM/transport behind it.
pub struct LoggingProvisioner;

impl ProvisionerClient for LoggingProvisioner {
    fn provision(
        &self,
        launch_id: &str,
        instance_ids: &[String],
        dt: &str,
        site: &str,
        allocation: Option<&str>,
        _vars: Option<PropertyMap>,
    ) -> BoxFuture<'_, ()> {
        let launch_id = launch_id.to_string();
        let instance_ids = instance_ids.to_vec();
        let dt = dt.to_string();
        let site = site.to_string();
        let allocation = allocation.map(str::to_string);
        Box::pin(async move {
            tracing::info!(launch_id, ?instance_ids, dt, site, ?allocation, "provision (logging stub)");
            Ok(())
        })
    }

    fn terminate_nodes(&self, node_ids: &[String]) -> BoxFuture<'_, ()> {
        let node_ids = node_ids.to_vec();
        Box::pin(async move {
            tracing::info!(?node_ids, "terminate_nodes (logging stub)");
            Ok(())
        })
    }

    fn terminate_all(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            tracing::info!("terminate_all (logging stub)");
            Ok(())
        })
    }
}

pub struct LoggingEeAgent;

impl EeAgentClient for LoggingEeAgent {
    fn launch_process(
        &self,
        ee_id: &str,
        upid: &str,
        round: u64,
        run_type: &str,
        _parameters: serde_json::Value,
    ) -> BoxFuture<'_, ()> {
        let ee_id = ee_id.to_string();
        let upid = upid.to_string();
        let run_type = run_type.to_string();
        Box::pin(async move {
            tracing::info!(ee_id, upid, round, run_type, "launch_process (logging stub)");
            Ok(())
        })
    }

    fn terminate_process(&self, ee_id: &str, upid: &str, round: u64) -> BoxFuture<'_, ()> {
        let ee_id = ee_id.to_string();
        let upid = upid.to_string();
        Box::pin(async move {
            tracing::info!(ee_id, upid, round, "terminate_process (logging stub)");
            Ok(())
        })
    }

    fn cleanup_process(&self, ee_id: &str, upid: &str, round: u64) -> BoxFuture<'_, ()> {
        let ee_id = ee_id.to_string();
        let upid = upid.to_string();
        Box::pin(async move {
            tracing::info!(ee_id, upid, round, "cleanup_process (logging stub)");
            Ok(())
        })
    }
}

pub struct LoggingEpumClient;

impl EpumClient for LoggingEpumClient {
    fn register_need(
        &self,
        dt: &str,
        _constraints: Option<PropertyMap>,
        count: u32,
        subscriber_name: &str,
        subscriber_op: &str,
    ) -> BoxFuture<'_, ()> {
        let dt = dt.to_string();
        let subscriber_name = subscriber_name.to_string();
        let subscriber_op = subscriber_op.to_string();
        Box::pin(async move {
            tracing::info!(dt, count, subscriber_name, subscriber_op, "register_need (logging stub)");
            Ok(())
        })
    }

    fn retire_node(&self, node_id: &str) -> BoxFuture<'_, ()> {
        let node_id = node_id.to_string();
        Box::pin(async move {
            tracing::info!(node_id, "retire_node (logging stub)");
            Ok(())
        })
    }
}

pub struct LoggingSubscriberSink;

impl SubscriberSink for LoggingSubscriberSink {
    fn notify_by_name(&self, name: &str, op: &str, payload: serde_json::Value) -> BoxFuture<'_, ()> {
        let name = name.to_string();
        let op = op.to_string();
        Box::pin(async move {
            tracing::info!(name, op, ?payload, "notify_by_name (logging stub)");
            Ok(())
        })
    }
}
