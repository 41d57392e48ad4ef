//! `Dispatcher` — the Process Dispatcher Core (spec §4.6).
//!
//! One `tokio::sync::Mutex<DispatcherState>` guards the process/resource/
//! node/queue tables, mirroring the decider's `Control`/`Intent` split:
//! handlers lock, mutate the tables and compute intents, unlock, then
//! perform EE-agent I/O and subscriber notification against the recorded
//! intents. No network call is ever made while the lock is held.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use epu_core::types::{InstanceState, PropertyMap};
use epu_core::{EeAgentClient, EeRegistryTable, EpumClient, ProcessState, SubscriberSink};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::types::{DeployedNode, EeHeartbeat, ExecutionEngineResource, ProcessRecord, Queue};

/// Work recorded inside the lock, executed against EE agents after it is
/// released.
enum EeIntent {
    Launch {
        ee_id: String,
        upid: String,
        round: u32,
        run_type: String,
        parameters: serde_json::Value,
    },
    Terminate {
        ee_id: String,
        upid: String,
        round: u32,
    },
    Cleanup {
        ee_id: String,
        upid: String,
        round: u32,
    },
}

#[derive(Default)]
struct DispatcherState {
    processes: HashMap<String, ProcessRecord>,
    resources: HashMap<String, ExecutionEngineResource>,
    nodes: HashMap<String, DeployedNode>,
    queue: Queue,
}

/// Introspection snapshot returned by [`Dispatcher::dump`] (spec §4.6,
/// §10.3), serving both the REST dump endpoint and test assertions.
#[derive(Debug, Serialize)]
pub struct DispatcherSnapshot {
    pub processes: Vec<ProcessRecord>,
    pub resources: Vec<ExecutionEngineResource>,
    pub nodes: Vec<DeployedNode>,
    pub queue: Vec<String>,
}

#[derive(Serialize)]
struct ProcessNotifyPayload {
    upid: String,
    state: ProcessState,
    assigned: Option<String>,
    round: u32,
}

impl From<&ProcessRecord> for ProcessNotifyPayload {
    fn from(r: &ProcessRecord) -> Self {
        Self {
            upid: r.upid.clone(),
            state: r.state,
            assigned: r.assigned.clone(),
            round: r.round,
        }
    }
}

pub struct Dispatcher {
    pdc_name: String,
    ee_agent: Arc<dyn EeAgentClient>,
    epum: Arc<dyn EpumClient>,
    notifier: Arc<dyn SubscriberSink>,
    registry: EeRegistryTable,
    state: Mutex<DispatcherState>,
}

impl Dispatcher {
    pub fn new(
        pdc_name: impl Into<String>,
        ee_agent: Arc<dyn EeAgentClient>,
        epum: Arc<dyn EpumClient>,
        notifier: Arc<dyn SubscriberSink>,
        registry: EeRegistryTable,
    ) -> Self {
        Self {
            pdc_name: pdc_name.into(),
            ee_agent,
            epum,
            notifier,
            registry,
            state: Mutex::new(DispatcherState::default()),
        }
    }

    /// For every registered engine spec, register base need with EPUM
    /// against this PDC's name, subscription op `dt_state`.
    pub async fn initialize(&self) -> DispatchResult<()> {
        for spec in self.registry.iter() {
            self.epum
                .register_need(&spec.deployable_type, None, spec.base_need, &self.pdc_name, "dt_state")
                .await
                .map_err(DispatchError::Transport)?;
            info!(dt = %spec.deployable_type, base_need = spec.base_need, "registered base need with epum");
        }
        Ok(())
    }

    /// Idempotent by `upid`: if already present, returns the current
    /// record unchanged. Otherwise creates a REQUESTED record and runs
    /// matchmaking. Never blocks on an actual EE launch.
    pub async fn dispatch_process(
        &self,
        upid: &str,
        run_type: &str,
        parameters: PropertyMap,
        subscribers: Vec<(String, String)>,
        constraints: PropertyMap,
        immediate: bool,
    ) -> DispatchResult<ProcessRecord> {
        let (record, intent) = {
            let mut state = self.state.lock().await;
            if let Some(existing) = state.processes.get(upid) {
                return Ok(existing.clone());
            }
            let record = ProcessRecord::new(
                upid.to_string(),
                run_type.to_string(),
                parameters,
                subscribers,
                constraints,
                immediate,
            );
            state.processes.insert(upid.to_string(), record);
            let intent = matchmake(&mut state, upid);
            (state.processes.get(upid).unwrap().clone(), intent)
        };

        self.execute_intent(intent).await;
        self.notify_process(&record).await;
        Ok(record)
    }

    /// Idempotent: absent upid is *NotFound*; terminal state is a no-op;
    /// unassigned-but-alive is finalized directly; otherwise exactly one
    /// EE terminate call is issued and the record moves to TERMINATING.
    pub async fn terminate_process(&self, upid: &str) -> DispatchResult<ProcessRecord> {
        let (record, intent) = {
            let mut state = self.state.lock().await;
            let current_state = state
                .processes
                .get(upid)
                .ok_or_else(|| DispatchError::ProcessNotFound(upid.to_string()))?
                .state;

            if current_state.is_terminal() || current_state == ProcessState::Terminating {
                let record = state.processes.get(upid).unwrap().clone();
                return Ok(record);
            }

            if current_state.is_unassigned() {
                let record = state.processes.get_mut(upid).unwrap();
                record.state = ProcessState::Terminated;
                record.assigned = None;
                state.queue.retain(|u| u != upid);
                (state.processes.get(upid).unwrap().clone(), None)
            } else {
                let record = state.processes.get_mut(upid).unwrap();
                let ee_id = record.assigned.clone().expect("assigned set when Pending/Running");
                let round = record.round;
                record.state = ProcessState::Terminating;
                (
                    state.processes.get(upid).unwrap().clone(),
                    Some(EeIntent::Terminate { ee_id, upid: upid.to_string(), round }),
                )
            }
        };

        self.execute_intent(intent).await;
        self.notify_process(&record).await;
        Ok(record)
    }

    /// Returns the current record without mutating anything.
    pub async fn get_process(&self, upid: &str) -> DispatchResult<ProcessRecord> {
        let state = self.state.lock().await;
        state
            .processes
            .get(upid)
            .cloned()
            .ok_or_else(|| DispatchError::ProcessNotFound(upid.to_string()))
    }

    /// Subscription sink from EPUM instance-state transitions.
    pub async fn dt_state(
        &self,
        node_id: &str,
        dt: &str,
        reported: InstanceState,
        properties: Option<PropertyMap>,
    ) -> DispatchResult<()> {
        match reported {
            InstanceState::Running => {
                let mut state = self.state.lock().await;
                if !state.nodes.contains_key(node_id) {
                    state.nodes.insert(
                        node_id.to_string(),
                        DeployedNode {
                            node_id: node_id.to_string(),
                            dt: dt.to_string(),
                            state: reported,
                            properties: properties.unwrap_or_default(),
                            resource_ids: Vec::new(),
                        },
                    );
                    info!(node_id, dt, "node registered");
                } else {
                    debug!(node_id, "node already known, ignoring duplicate RUNNING");
                }
                Ok(())
            }
            InstanceState::Terminating | InstanceState::Terminated => {
                self.teardown_node(node_id).await
            }
            _ => {
                let mut state = self.state.lock().await;
                if let Some(node) = state.nodes.get_mut(node_id) {
                    node.state = reported;
                }
                Ok(())
            }
        }
    }

    async fn teardown_node(&self, node_id: &str) -> DispatchResult<()> {
        let affected: Vec<(String, String, u32)> = {
            let mut state = self.state.lock().await;
            let Some(node) = state.nodes.get(node_id) else {
                return Ok(());
            };
            let resource_ids = node.resource_ids.clone();
            let mut affected = Vec::new();
            for ee_id in &resource_ids {
                if let Some(resource) = state.resources.get_mut(ee_id) {
                    resource.enabled = false;
                    let mut upids: Vec<String> = resource.processes.clone();
                    for u in &resource.pending {
                        if !upids.contains(u) {
                            upids.push(u.clone());
                        }
                    }
                    for upid in upids {
                        if let Some(record) = state.processes.get(&upid) {
                            affected.push((upid, ee_id.clone(), record.round));
                        }
                    }
                }
            }
            affected
        };

        for (upid, ee_id, round) in affected {
            if let Err(e) = self.ee_agent.terminate_process(&ee_id, &upid, round as u64).await {
                warn!(error = %e, "ee agent call failed, will be retried by next control loop tick");
            }

            let (first_notify, reschedule) = {
                let mut state = self.state.lock().await;
                let Some(record) = state.processes.get_mut(&upid) else {
                    continue;
                };
                if record.state == ProcessState::Terminating {
                    record.state = ProcessState::Terminated;
                    record.assigned = None;
                    (Some(state.processes.get(&upid).unwrap().clone()), false)
                } else if matches!(record.state, ProcessState::Pending | ProcessState::Running) {
                    record.round += 1;
                    record.assigned = None;
                    record.state = ProcessState::DiedRequested;
                    (Some(state.processes.get(&upid).unwrap().clone()), true)
                } else {
                    (None, false)
                }
            };

            if let Some(record) = &first_notify {
                self.notify_process(record).await;
            }

            if reschedule {
                let (rematched, intent) = {
                    let mut state = self.state.lock().await;
                    let intent = matchmake(&mut state, &upid);
                    (state.processes.get(&upid).unwrap().clone(), intent)
                };
                self.execute_intent(intent).await;
                self.notify_process(&rematched).await;
            }
        }

        let mut state = self.state.lock().await;
        if let Some(node) = state.nodes.remove(node_id) {
            for ee_id in node.resource_ids {
                state.resources.remove(&ee_id);
            }
        }
        info!(node_id, "node and its resources dropped");
        Ok(())
    }

    /// Per-EE heartbeat: registers the EE on first heartbeat (requires the
    /// node to already be known), reconciles reported process states, and
    /// opportunistically drains the queue against freed slots.
    pub async fn ee_heartbeat(&self, sender: &str, beat: EeHeartbeat) -> DispatchResult<()> {
        let node_id = beat.node_id.clone().unwrap_or_else(|| sender.to_string());

        let (notifications, cleanups, launches, reschedules) = {
            let mut state = self.state.lock().await;

            if !state.resources.contains_key(sender) {
                let Some(node) = state.nodes.get(&node_id).cloned() else {
                    warn!(sender, node_id, "heartbeat from unconfirmed node, dropping");
                    return Ok(());
                };
                let Some(spec) = self.registry.get(&node.dt).cloned() else {
                    warn!(sender, dt = %node.dt, "heartbeat references unknown deployable type, dropping");
                    return Ok(());
                };
                let mut properties = node.properties.clone();
                properties.insert("engine_type".to_string(), serde_json::json!(spec.engine_id));
                state.resources.insert(
                    sender.to_string(),
                    ExecutionEngineResource {
                        ee_id: sender.to_string(),
                        node_id: node_id.clone(),
                        slot_count: spec.slots,
                        properties,
                        enabled: true,
                        processes: Vec::new(),
                        pending: Vec::new(),
                    },
                );
                if let Some(node) = state.nodes.get_mut(&node_id) {
                    if !node.resource_ids.contains(&sender.to_string()) {
                        node.resource_ids.push(sender.to_string());
                    }
                }
                info!(sender, node_id, slots = spec.slots, "ee resource registered");
            }

            let mut notifications = Vec::new();
            let mut cleanups = Vec::new();
            let mut reschedules = Vec::new();
            let mut running_upids = Vec::new();

            for entry in &beat.processes {
                let (effective, _joined) = entry.state.normalize();
                if effective.at_most(ProcessState::Running) {
                    running_upids.push(entry.upid.clone());
                }

                let Some(record) = state.processes.get_mut(&entry.upid) else {
                    warn!(upid = %entry.upid, "heartbeat for unknown process, skipping");
                    continue;
                };
                if entry.round < record.round {
                    debug!(upid = %entry.upid, reported = entry.round, current = record.round, "stale heartbeat round, skipping");
                    continue;
                }
                if let Some(resource) = state.resources.get_mut(sender) {
                    resource.pending.retain(|u| u != &entry.upid);
                }
                if effective == record.state {
                    continue;
                }

                match effective {
                    ProcessState::Running if record.state == ProcessState::Pending => {
                        record.state = ProcessState::Running;
                        notifications.push(state.processes.get(&entry.upid).unwrap().clone());
                    }
                    ProcessState::Terminated | ProcessState::Failed => {
                        if record.state == ProcessState::Terminating {
                            record.state = effective;
                            record.assigned = None;
                            notifications.push(state.processes.get(&entry.upid).unwrap().clone());
                            cleanups.push((sender.to_string(), entry.upid.clone(), entry.round));
                        } else if matches!(record.state, ProcessState::Pending | ProcessState::Running) {
                            record.round += 1;
                            record.assigned = None;
                            record.state = ProcessState::DiedRequested;
                            notifications.push(state.processes.get(&entry.upid).unwrap().clone());
                            cleanups.push((sender.to_string(), entry.upid.clone(), entry.round));
                            reschedules.push(entry.upid.clone());
                        }
                    }
                    _ => {}
                }
            }

            if let Some(resource) = state.resources.get_mut(sender) {
                resource.processes = running_upids;
            }

            let launches = consider_resource(&mut state, sender);
            (notifications, cleanups, launches, reschedules)
        };

        for record in &notifications {
            self.notify_process(record).await;
        }
        for (ee_id, upid, round) in cleanups {
            if let Err(e) = self.ee_agent.cleanup_process(&ee_id, &upid, round as u64).await {
                warn!(error = %e, "ee agent call failed, will be retried by next control loop tick");
            }
        }
        for intent in launches {
            self.execute_intent(Some(intent)).await;
        }
        for upid in reschedules {
            let (record, intent) = {
                let mut state = self.state.lock().await;
                let intent = matchmake(&mut state, &upid);
                (state.processes.get(&upid).unwrap().clone(), intent)
            };
            self.execute_intent(intent).await;
            self.notify_process(&record).await;
        }
        Ok(())
    }

    pub async fn dump(&self) -> DispatcherSnapshot {
        let state = self.state.lock().await;
        DispatcherSnapshot {
            processes: state.processes.values().cloned().collect(),
            resources: state.resources.values().cloned().collect(),
            nodes: state.nodes.values().cloned().collect(),
            queue: state.queue.iter().cloned().collect(),
        }
    }

    async fn execute_intent(&self, intent: Option<EeIntent>) {
        let Some(intent) = intent else { return };
        let result = match &intent {
            EeIntent::Launch { ee_id, upid, round, run_type, parameters } => {
                self.ee_agent.launch_process(ee_id, upid, *round as u64, run_type, parameters.clone()).await
            }
            EeIntent::Terminate { ee_id, upid, round } => {
                self.ee_agent.terminate_process(ee_id, upid, *round as u64).await
            }
            EeIntent::Cleanup { ee_id, upid, round } => {
                self.ee_agent.cleanup_process(ee_id, upid, *round as u64).await
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "ee agent call failed, will be retried by next control loop tick");
        }
    }

    async fn notify_process(&self, record: &ProcessRecord) {
        let payload = serde_json::to_value(ProcessNotifyPayload::from(record)).unwrap_or_default();
        for (name, op) in &record.subscribers {
            if let Err(e) = self.notifier.notify_by_name(name, op, payload.clone()).await {
                warn!(name, op, upid = %record.upid, error = %e, "process notification delivery failed");
            }
        }
    }
}

/// Run matchmaking for `upid`, mutating `state` and returning the launch
/// intent to execute once the lock is released. No I/O happens here.
fn matchmake(state: &mut DispatcherState, upid: &str) -> Option<EeIntent> {
    let (constraints, immediate, run_type, parameters) = {
        let record = state.processes.get(upid).expect("matchmake called with known upid");
        (record.constraints.clone(), record.immediate, record.run_type.clone(), record.parameters.clone())
    };

    let candidate = state
        .resources
        .values()
        .filter(|r| r.available_slots() > 0 && match_constraints(&constraints, &r.properties))
        .min_by_key(|r| r.slot_count)
        .map(|r| r.ee_id.clone());

    let Some(ee_id) = candidate else {
        let record = state.processes.get_mut(upid).unwrap();
        if immediate {
            record.state = ProcessState::Rejected;
            record.assigned = None;
            state.queue.retain(|u| u != upid);
        } else if record.state != ProcessState::Waiting {
            record.state = ProcessState::Waiting;
            record.assigned = None;
            if !state.queue.contains(&upid.to_string()) {
                state.queue.push_back(upid.to_string());
            }
        }
        return None;
    };

    let round = {
        let record = state.processes.get_mut(upid).unwrap();
        record.state = ProcessState::Pending;
        record.assigned = Some(ee_id.clone());
        state.queue.retain(|u| u != upid);
        record.round
    };
    if let Some(resource) = state.resources.get_mut(&ee_id) {
        resource.pending.push(upid.to_string());
    }

    Some(EeIntent::Launch {
        ee_id,
        upid: upid.to_string(),
        round,
        run_type,
        parameters: serde_json::to_value(parameters).unwrap_or_default(),
    })
}

/// Drain the queue against one resource's freed slots, in FIFO order,
/// removing matched upids from the queue in a single pass.
fn consider_resource(state: &mut DispatcherState, ee_id: &str) -> Vec<EeIntent> {
    let mut intents = Vec::new();
    let mut remaining: VecDeque<String> = VecDeque::new();

    while let Some(upid) = state.queue.pop_front() {
        let can_place = state
            .resources
            .get(ee_id)
            .map(|r| r.available_slots() > 0)
            .unwrap_or(false)
            && state
                .processes
                .get(&upid)
                .zip(state.resources.get(ee_id))
                .map(|(p, r)| match_constraints(&p.constraints, &r.properties))
                .unwrap_or(false);

        if can_place {
            let round = {
                let record = state.processes.get_mut(&upid).unwrap();
                record.state = ProcessState::Pending;
                record.assigned = Some(ee_id.to_string());
                record.round
            };
            let (run_type, parameters) = {
                let record = state.processes.get(&upid).unwrap();
                (record.run_type.clone(), record.parameters.clone())
            };
            if let Some(resource) = state.resources.get_mut(ee_id) {
                resource.pending.push(upid.clone());
            }
            intents.push(EeIntent::Launch {
                ee_id: ee_id.to_string(),
                upid,
                round,
                run_type,
                parameters: serde_json::to_value(parameters).unwrap_or_default(),
            });
        } else {
            remaining.push_back(upid);
        }
    }
    state.queue = remaining;
    intents
}

/// `null` constraint value is a wildcard; array value means containment;
/// scalar value means equality. A non-null constraint against a missing
/// property never matches.
fn match_constraints(constraints: &PropertyMap, properties: &PropertyMap) -> bool {
    for (k, v) in constraints {
        if v.is_null() {
            continue;
        }
        let Some(pv) = properties.get(k) else {
            return false;
        };
        let matches = match v.as_array() {
            Some(arr) => arr.contains(pv),
            None => pv == v,
        };
        if !matches {
            return false;
        }
    }
    true
}
