//! `EpumReactor` — message handlers over the domain/instance store (spec §4.4).
//!
//! Each public method is its own short store transaction; none of them
//! hold a lock across an await point or a notifier call. Notifier
//! delivery is always best-effort: failures are logged and never
//! propagated back to the caller that triggered the transition.

use std::sync::Arc;

use epu_core::{
    classify_for_notify, ErrorRecord, InstanceHealthState, InstanceState, NotifyPayload,
    PropertyMap, SubscriberSink,
};
use epu_store::{DomainConfig, DomainRecord, EpumStore, InstanceRecord};
use tracing::{debug, warn};

use crate::error::{ReactorError, ReactorResult};

/// `describe_domain`'s return shape: the domain row plus its instances.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DomainDescription {
    pub domain: DomainRecord,
    pub instances: Vec<InstanceRecord>,
}

/// Additive config patch accepted by `reconfigure_domain`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DomainConfigPatch {
    pub general: Option<PropertyMap>,
    pub engine: Option<PropertyMap>,
    pub health: Option<PropertyMap>,
}

/// `new_instance_state`'s payload. `node_id` is the instance ID (the
/// source's terminology for a provisioned VM).
#[derive(Debug, Clone)]
pub struct InstanceStateContent {
    pub node_id: String,
    pub state: InstanceState,
}

/// `new_heartbeat`'s payload.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatContent {
    pub node_id: String,
    pub state: InstanceHealthState,
    pub error_time: Option<u64>,
    pub error: Option<String>,
    pub failed_processes: Vec<String>,
}

pub struct EpumReactor {
    store: EpumStore,
    notifier: Arc<dyn SubscriberSink>,
}

impl EpumReactor {
    pub fn new(store: EpumStore, notifier: Arc<dyn SubscriberSink>) -> Self {
        Self { store, notifier }
    }

    pub fn add_domain(
        &self,
        owner: &str,
        domain_id: &str,
        config: DomainConfig,
        subscriber: Option<(String, String)>,
    ) -> ReactorResult<()> {
        match self.store.add_domain(owner, domain_id, config, subscriber) {
            Ok(()) => Ok(()),
            Err(epu_store::StoreError::AlreadyExists(_)) => {
                Err(ReactorError::DomainAlreadyExists(owner.to_string(), domain_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn remove_domain(&self, owner: &str, domain_id: &str) -> ReactorResult<()> {
        if self.store.remove_domain(owner, domain_id)? {
            Ok(())
        } else {
            Err(ReactorError::DomainNotFound(owner.to_string(), domain_id.to_string()))
        }
    }

    pub fn list_domains(&self, owner: &str) -> ReactorResult<Vec<DomainRecord>> {
        Ok(self.store.list_domains_by_owner(owner)?)
    }

    pub fn describe_domain(&self, owner: &str, domain_id: &str) -> ReactorResult<DomainDescription> {
        let domain = self
            .store
            .get_domain(owner, domain_id)?
            .ok_or_else(|| ReactorError::DomainNotFound(owner.to_string(), domain_id.to_string()))?;
        let instances = self.store.get_instances(owner, domain_id)?;
        Ok(DomainDescription { domain, instances })
    }

    pub fn reconfigure_domain(
        &self,
        owner: &str,
        domain_id: &str,
        patch: DomainConfigPatch,
    ) -> ReactorResult<DomainRecord> {
        let mut current = self
            .store
            .get_domain(owner, domain_id)?
            .ok_or_else(|| ReactorError::DomainNotFound(owner.to_string(), domain_id.to_string()))?;
        if let Some(general) = patch.general {
            current = self.store.add_general_config(owner, domain_id, current.version, general)?;
        }
        if let Some(engine) = patch.engine {
            current = self.store.add_engine_config(owner, domain_id, current.version, engine)?;
        }
        if let Some(health) = patch.health {
            current = self.store.add_health_config(owner, domain_id, current.version, health)?;
        }
        Ok(current)
    }

    pub fn subscribe_domain(&self, owner: &str, domain_id: &str, name: &str, op: &str) -> ReactorResult<()> {
        let domain = self
            .store
            .get_domain(owner, domain_id)?
            .ok_or_else(|| ReactorError::DomainNotFound(owner.to_string(), domain_id.to_string()))?;
        self.store.add_subscriber(owner, domain_id, domain.version, name, op)?;
        Ok(())
    }

    pub fn unsubscribe_domain(&self, owner: &str, domain_id: &str, name: &str) -> ReactorResult<()> {
        let domain = self
            .store
            .get_domain(owner, domain_id)?
            .ok_or_else(|| ReactorError::DomainNotFound(owner.to_string(), domain_id.to_string()))?;
        self.store.remove_subscriber(owner, domain_id, domain.version, name)?;
        Ok(())
    }

    /// Records a new instance state and, for externally observable
    /// transitions, fans out to the domain's subscribers. A `node_id`
    /// with no known domain is logged and dropped, not an error — the
    /// message may simply have arrived after the instance was removed.
    pub async fn new_instance_state(&self, content: InstanceStateContent) -> ReactorResult<()> {
        let Some(domain) = self.store.get_domain_for_instance_id(&content.node_id)? else {
            warn!(node_id = %content.node_id, "new_instance_state: unknown domain for instance");
            return Ok(());
        };

        let record = self.store.new_instance_state(&content.node_id, content.state)?;

        if let Some(reduced) = classify_for_notify(record.state) {
            let payload = NotifyPayload {
                domain_id: domain.domain_id.clone(),
                instance_id: record.instance_id.clone(),
                state: reduced,
                site: record.site.clone(),
                allocation: record.allocation.clone(),
                deployable_type: record.deployable_type.clone(),
            };
            self.notify_subscribers(&domain, &payload).await;
        }
        Ok(())
    }

    /// Health is ignored entirely when the domain has disabled it. OK
    /// heartbeats only upgrade health if not already OK/ZOMBIE and the
    /// instance has not failed — this avoids re-zombifying an instance
    /// whose terminal state has already been recorded. The heartbeat
    /// timestamp is only written after the health/state write commits.
    pub fn new_heartbeat(&self, _caller: &str, content: HeartbeatContent, timestamp: u64) -> ReactorResult<()> {
        let Some(domain) = self.store.get_domain_for_instance_id(&content.node_id)? else {
            warn!(node_id = %content.node_id, "new_heartbeat: unknown domain for instance");
            return Ok(());
        };
        if !domain.config.is_health_enabled() {
            debug!(node_id = %content.node_id, "new_heartbeat: health disabled for domain, ignoring");
            return Ok(());
        }

        let Some(instance) = self.store.get_instance(&content.node_id)? else {
            warn!(node_id = %content.node_id, "new_heartbeat: instance record missing");
            return Ok(());
        };

        if content.state == InstanceHealthState::Ok {
            let already_settled = matches!(instance.health, InstanceHealthState::Ok | InstanceHealthState::Zombie);
            let past_terminated = instance.state >= InstanceState::Terminated;
            if !already_settled && !past_terminated {
                self.store.new_instance_health(&content.node_id, InstanceHealthState::Ok, None, Vec::new())?;
            }
        } else if content.state != instance.health {
            let mut errors = Vec::new();
            if let Some(message) = content.error {
                errors.push(ErrorRecord { error_time: content.error_time, message });
            }
            for upid in &content.failed_processes {
                errors.push(ErrorRecord {
                    error_time: content.error_time,
                    message: format!("process failed: {upid}"),
                });
            }
            self.store
                .new_instance_health(&content.node_id, content.state, content.error_time, errors)?;
        }

        self.store.set_instance_heartbeat_time(&content.node_id, timestamp)?;
        Ok(())
    }

    /// Reserved sensor-input entry point. No concrete sensor type is wired
    /// in this version.
    pub fn new_sensor_info(&self, _content: serde_json::Value) -> ReactorResult<()> {
        Err(ReactorError::NotImplemented("new_sensor_info".to_string()))
    }

    async fn notify_subscribers(&self, domain: &DomainRecord, payload: &NotifyPayload) {
        let value = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to serialize notify payload");
                return;
            }
        };
        for (name, op) in &domain.subscribers {
            if let Err(e) = self.notifier.notify_by_name(name, op, value.clone()).await {
                warn!(name, op, error = %e, "subscriber notification failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        calls: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }
    }

    impl SubscriberSink for RecordingSink {
        fn notify_by_name(&self, name: &str, op: &str, _payload: serde_json::Value) -> epu_core::BoxFuture<'_, ()> {
            self.calls.lock().unwrap().push((name.to_string(), op.to_string()));
            Box::pin(async { Ok(()) })
        }
    }

    fn reactor() -> (EpumReactor, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let reactor = EpumReactor::new(EpumStore::open_in_memory().unwrap(), sink.clone());
        (reactor, sink)
    }

    fn instance(id: &str) -> InstanceRecord {
        InstanceRecord {
            instance_id: id.to_string(),
            owner: "alice".to_string(),
            domain_id: "d1".to_string(),
            site: None,
            allocation: None,
            deployable_type: "dt1".to_string(),
            state: InstanceState::Requesting,
            health: InstanceHealthState::Unknown,
            extravars: Default::default(),
            launch_id: None,
            last_heartbeat_time: None,
            error_time: None,
            errors: Vec::new(),
        }
    }

    #[test]
    fn add_domain_twice_is_already_exists() {
        let (r, _sink) = reactor();
        r.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        let err = r.add_domain("alice", "d1", DomainConfig::default(), None).unwrap_err();
        assert!(matches!(err, ReactorError::DomainAlreadyExists(..)));
    }

    #[test]
    fn reconfigure_missing_domain_is_not_found() {
        let (r, _sink) = reactor();
        let err = r
            .reconfigure_domain("alice", "missing", DomainConfigPatch::default())
            .unwrap_err();
        assert!(matches!(err, ReactorError::DomainNotFound(..)));
    }

    #[tokio::test]
    async fn running_transition_notifies_subscribers() {
        let (r, sink) = reactor();
        r.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        r.subscribe_domain("alice", "d1", "sub1", "dt_state").unwrap();
        r.store.create_instance(instance("i1")).unwrap();

        r.new_instance_state(InstanceStateContent {
            node_id: "i1".to_string(),
            state: InstanceState::Running,
        })
        .await
        .unwrap();

        assert_eq!(sink.calls.lock().unwrap().as_slice(), &[("sub1".to_string(), "dt_state".to_string())]);
    }

    #[tokio::test]
    async fn pending_transition_is_silent() {
        let (r, sink) = reactor();
        r.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        r.subscribe_domain("alice", "d1", "sub1", "dt_state").unwrap();
        r.store.create_instance(instance("i1")).unwrap();

        r.new_instance_state(InstanceStateContent {
            node_id: "i1".to_string(),
            state: InstanceState::Pending,
        })
        .await
        .unwrap();

        assert!(sink.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_instance_is_dropped_not_errored() {
        let (r, _sink) = reactor();
        let result = r
            .new_instance_state(InstanceStateContent {
                node_id: "ghost".to_string(),
                state: InstanceState::Running,
            })
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn heartbeat_disabled_domain_is_ignored() {
        let (r, _sink) = reactor();
        let mut config = DomainConfig::default();
        config.health.insert("enabled".to_string(), serde_json::json!(false));
        r.add_domain("alice", "d1", config, None).unwrap();
        r.store.create_instance(instance("i1")).unwrap();

        r.new_heartbeat(
            "caller",
            HeartbeatContent {
                node_id: "i1".to_string(),
                state: InstanceHealthState::Error,
                ..Default::default()
            },
            100,
        )
        .unwrap();

        let rec = r.store.get_instance("i1").unwrap().unwrap();
        assert_eq!(rec.health, InstanceHealthState::Unknown);
        assert_eq!(rec.last_heartbeat_time, None);
    }

    #[test]
    fn ok_heartbeat_upgrades_health_and_stamps_time() {
        let (r, _sink) = reactor();
        r.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        r.store.create_instance(instance("i1")).unwrap();

        r.new_heartbeat(
            "caller",
            HeartbeatContent {
                node_id: "i1".to_string(),
                state: InstanceHealthState::Ok,
                ..Default::default()
            },
            100,
        )
        .unwrap();

        let rec = r.store.get_instance("i1").unwrap().unwrap();
        assert_eq!(rec.health, InstanceHealthState::Ok);
        assert_eq!(rec.last_heartbeat_time, Some(100));
    }

    #[test]
    fn ok_heartbeat_past_terminated_does_not_clobber_health() {
        let (r, _sink) = reactor();
        r.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        let mut terminated = instance("i1");
        terminated.state = InstanceState::Terminated;
        terminated.health = InstanceHealthState::Error;
        r.store.create_instance(terminated).unwrap();

        r.new_heartbeat(
            "caller",
            HeartbeatContent {
                node_id: "i1".to_string(),
                state: InstanceHealthState::Ok,
                ..Default::default()
            },
            100,
        )
        .unwrap();

        let rec = r.store.get_instance("i1").unwrap().unwrap();
        assert_eq!(rec.health, InstanceHealthState::Error, "OK heartbeat must not revive health past TERMINATED");
    }

    #[test]
    fn error_heartbeat_records_error_and_does_not_clobber_zombie() {
        let (r, _sink) = reactor();
        r.add_domain("alice", "d1", DomainConfig::default(), None).unwrap();
        r.store.create_instance(instance("i1")).unwrap();

        r.new_heartbeat(
            "caller",
            HeartbeatContent {
                node_id: "i1".to_string(),
                state: InstanceHealthState::Error,
                error_time: Some(5),
                error: Some("disk full".to_string()),
                failed_processes: vec!["p1".to_string()],
            },
            100,
        )
        .unwrap();

        let rec = r.store.get_instance("i1").unwrap().unwrap();
        assert_eq!(rec.health, InstanceHealthState::Error);
        assert_eq!(rec.errors.len(), 2);
    }

    #[test]
    fn sensor_info_is_not_implemented() {
        let (r, _sink) = reactor();
        let err = r.new_sensor_info(serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ReactorError::NotImplemented(_)));
    }
}
