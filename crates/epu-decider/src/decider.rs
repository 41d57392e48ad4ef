//! `Decider` — the periodic leader-only decide-cycle driver (spec §4.5).
//!
//! Structurally the same shape as the existing autoscaler's
//! `run()`/`evaluate_all()` pair: a `tokio::select!` between a tick sleep
//! and a shutdown watch channel, with the per-domain work kept as a plain
//! async function callable directly from tests. "Leader-only" is honored
//! by a predicate supplied at construction rather than any election logic
//! of our own (out of scope per spec §1).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use epu_core::types::PropertyMap;
use epu_core::ProvisionerClient;
use epu_engine::{Control, DecisionEngine, EngineInstance, EngineRegistry, EngineState, Intent};
use epu_store::{DomainRecord, EpumStore, InstanceRecord};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::{DeciderError, DeciderResult};

/// A closure deciding whether this worker currently holds the decider
/// lease for the process. Leader election itself is out of scope (spec
/// §1, §5) — this is only the seam a real election mechanism slots
/// behind.
pub type LeaderPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

struct EngineSlot {
    engine: Box<dyn DecisionEngine>,
    initialized: bool,
    pending_reconfigure: Option<PropertyMap>,
}

/// Per-domain decision-engine bookkeeping plus the shared collaborators
/// needed to translate engine intents into provisioner calls and store
/// writes.
pub struct Decider {
    store: EpumStore,
    provisioner: Arc<dyn ProvisionerClient>,
    registry: EngineRegistry,
    leader: LeaderPredicate,
    slots: Mutex<HashMap<(String, String), EngineSlot>>,
}

impl Decider {
    pub fn new(store: EpumStore, provisioner: Arc<dyn ProvisionerClient>) -> Self {
        Self::with_leader(store, provisioner, Arc::new(|| true))
    }

    pub fn with_leader(store: EpumStore, provisioner: Arc<dyn ProvisionerClient>, leader: LeaderPredicate) -> Self {
        Self {
            store,
            provisioner,
            registry: EngineRegistry::new(),
            leader,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Run one tick: for every known domain, build a snapshot and drive
    /// the engine's `initialize`/`reconfigure`/`decide`. Skipped entirely
    /// when `leader` reports we are not the decider leader.
    pub async fn tick(&self) -> DeciderResult<()> {
        if !(self.leader)() {
            debug!("not decider leader, skipping tick");
            return Ok(());
        }
        let domains = self.store.list_all_domains()?;
        for domain in domains {
            if let Err(e) = self.decide_one_domain(&domain.owner, &domain.domain_id).await {
                warn!(owner = %domain.owner, domain_id = %domain.domain_id, error = %e, "decide cycle failed");
            }
        }
        Ok(())
    }

    /// Drive a single domain through one decide cycle. Exposed directly
    /// so tests can exercise a cycle without the tick loop.
    pub async fn decide_one_domain(&self, owner: &str, domain_id: &str) -> DeciderResult<()> {
        let domain = self
            .store
            .get_domain(owner, domain_id)?
            .ok_or_else(|| DeciderError::DomainNotFound(owner.to_string(), domain_id.to_string()))?;
        let instances = self.store.get_instances(owner, domain_id)?;
        let state = build_engine_state(&instances);
        let control = Control::new();

        let intents = {
            let mut slots = self.slots.lock().await;
            let key = (owner.to_string(), domain_id.to_string());
            let engine_name = engine_class(&domain);
            let slot = match slots.entry(key) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => e.insert(EngineSlot {
                    engine: self.registry.create(engine_name)?,
                    initialized: false,
                    pending_reconfigure: None,
                }),
            };

            if !slot.initialized {
                slot.engine.initialize(&control, &state, Some(domain.config.engine.clone()))?;
                slot.initialized = true;
            }
            if let Some(patch) = slot.pending_reconfigure.take() {
                slot.engine.reconfigure(&control, patch)?;
            }
            slot.engine.decide(&control, &state)?;
            control.take_intents()
        };

        self.execute_intents(owner, domain_id, intents).await
    }

    /// Apply the intents an engine call recorded, outside any lock:
    /// provisioner I/O first, then the corresponding store write.
    async fn execute_intents(
        &self,
        owner: &str,
        domain_id: &str,
        intents: Vec<Intent>,
    ) -> DeciderResult<()> {
        for intent in intents {
            match intent {
                Intent::Launch {
                    launch_id,
                    instance_ids,
                    deployable_type,
                    site,
                    allocation,
                    extravars,
                } => {
                    let vars = extravars.as_ref().map(extravars_to_properties);
                    self.provisioner
                        .provision(&launch_id, &instance_ids, &deployable_type, &site, Some(&allocation), vars)
                        .await
                        .map_err(DeciderError::Transport)?;
                    for instance_id in instance_ids {
                        self.store.create_instance(InstanceRecord {
                            instance_id,
                            owner: owner.to_string(),
                            domain_id: domain_id.to_string(),
                            site: Some(site.clone()),
                            allocation: Some(allocation.clone()),
                            deployable_type: deployable_type.clone(),
                            state: epu_core::InstanceState::Requesting,
                            health: epu_core::InstanceHealthState::Unknown,
                            extravars: extravars.clone().unwrap_or_default(),
                            launch_id: Some(launch_id.clone()),
                            last_heartbeat_time: None,
                            error_time: None,
                            errors: Vec::new(),
                        })?;
                    }
                    info!(owner, domain_id, launch_id, "launch intent executed");
                }
                Intent::Destroy { instance_ids } => {
                    self.provisioner
                        .terminate_nodes(&instance_ids)
                        .await
                        .map_err(DeciderError::Transport)?;
                    for instance_id in &instance_ids {
                        self.store.new_instance_state(instance_id, epu_core::InstanceState::Terminating)?;
                    }
                    info!(owner, domain_id, ?instance_ids, "destroy intent executed");
                }
            }
        }
        Ok(())
    }

    /// Translate a "register need" sensor message into a new domain (for
    /// an unseen tuple) or a queued `preserve_n` reconfigure of an
    /// existing one.
    pub async fn handle_register_need(
        &self,
        owner: &str,
        dt: &str,
        site: &str,
        allocation: &str,
        count: u32,
        subscriber_name: &str,
        subscriber_op: &str,
    ) -> DeciderResult<()> {
        let domain_id = need_domain_id(dt, site, allocation);
        match self.store.get_domain(owner, &domain_id)? {
            None => {
                let mut config = epu_store::DomainConfig::default();
                config.engine.insert(epu_engine::needy::CONF_PRESERVE_N.to_string(), serde_json::json!(count));
                config
                    .engine
                    .insert(epu_engine::needy::CONF_IAAS_SITE.to_string(), serde_json::json!(site));
                config
                    .engine
                    .insert(epu_engine::needy::CONF_IAAS_ALLOCATION.to_string(), serde_json::json!(allocation));
                config
                    .engine
                    .insert(epu_engine::needy::CONF_DEPLOYABLE_TYPE.to_string(), serde_json::json!(dt));
                self.store
                    .add_domain(owner, &domain_id, config, Some((subscriber_name.to_string(), subscriber_op.to_string())))?;
                info!(owner, %domain_id, dt, site, allocation, count, "created domain for registered need");
            }
            Some(existing) => {
                self.store
                    .add_engine_config(
                        owner,
                        &domain_id,
                        existing.version,
                        [(epu_engine::needy::CONF_PRESERVE_N.to_string(), serde_json::json!(count))]
                            .into_iter()
                            .collect(),
                    )?;
                self.queue_reconfigure(
                    owner,
                    &domain_id,
                    [(epu_engine::needy::CONF_PRESERVE_N.to_string(), serde_json::json!(count))]
                        .into_iter()
                        .collect(),
                )
                .await;
                info!(owner, %domain_id, count, "reconfigured preserve_n for registered need");
            }
        }
        Ok(())
    }

    /// Translate a "retire node" sensor message into an appended
    /// `retirable_nodes` entry for the instance's domain.
    pub async fn handle_retire_node(&self, instance_id: &str) -> DeciderResult<()> {
        let Some(domain) = self.store.get_domain_for_instance_id(instance_id)? else {
            warn!(instance_id, "retire_node: unknown domain for instance");
            return Ok(());
        };
        let mut retirable: Vec<String> = domain
            .config
            .engine
            .get(epu_engine::needy::CONF_RETIRABLE_NODES)
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        if !retirable.iter().any(|id| id == instance_id) {
            retirable.push(instance_id.to_string());
        }
        let patch: PropertyMap = [(
            epu_engine::needy::CONF_RETIRABLE_NODES.to_string(),
            serde_json::json!(retirable),
        )]
        .into_iter()
        .collect();
        self.store
            .add_engine_config(&domain.owner, &domain.domain_id, domain.version, patch.clone())?;
        self.queue_reconfigure(&domain.owner, &domain.domain_id, patch).await;
        Ok(())
    }

    async fn queue_reconfigure(&self, owner: &str, domain_id: &str, patch: PropertyMap) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&(owner.to_string(), domain_id.to_string())) {
            match &mut slot.pending_reconfigure {
                Some(existing) => existing.extend(patch),
                None => slot.pending_reconfigure = Some(patch),
            }
        }
    }

    /// Run the tick loop until `shutdown` fires.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "decider started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "decider tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("decider shutting down");
                    break;
                }
            }
        }
    }
}

fn engine_class(domain: &DomainRecord) -> &str {
    domain
        .config
        .general
        .get("engine_class")
        .and_then(|v| v.as_str())
        .unwrap_or(epu_engine::registry::NEEDY_ENGINE)
}

fn need_domain_id(dt: &str, site: &str, allocation: &str) -> String {
    format!("need-{dt}-{site}-{allocation}")
}

fn build_engine_state(instances: &[InstanceRecord]) -> EngineState {
    EngineState::new(
        instances
            .iter()
            .map(|i| EngineInstance {
                instance_id: i.instance_id.clone(),
                state: i.state,
                health: i.health,
                extravars: i.extravars.clone(),
            })
            .collect(),
    )
}

fn extravars_to_properties(vars: &HashMap<String, Option<String>>) -> PropertyMap {
    vars.iter()
        .map(|(k, v)| {
            (
                k.clone(),
                v.as_ref().map(|s| serde_json::json!(s)).unwrap_or(serde_json::Value::Null),
            )
        })
        .collect()
}
