//! Dispatcher data model: processes, EE resources, nodes, and the wire
//! shapes the EE heartbeat carries (spec §4.6, §6).

use std::collections::VecDeque;

use epu_core::types::{InstanceState, PropertyMap};
use epu_core::ProcessState;
use serde::{Deserialize, Serialize};

/// A dispatched (or queued, or rejected) process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub upid: String,
    pub run_type: String,
    pub parameters: PropertyMap,
    pub subscribers: Vec<(String, String)>,
    pub constraints: PropertyMap,
    pub immediate: bool,
    pub state: ProcessState,
    /// `ee_id` this process is placed on. Null whenever
    /// `state.is_unassigned()`.
    pub assigned: Option<String>,
    /// Monotone redeploy counter; bumped every time the process loses its
    /// resource and is rescheduled.
    pub round: u32,
}

impl ProcessRecord {
    pub fn new(
        upid: String,
        run_type: String,
        parameters: PropertyMap,
        subscribers: Vec<(String, String)>,
        constraints: PropertyMap,
        immediate: bool,
    ) -> Self {
        Self {
            upid,
            run_type,
            parameters,
            subscribers,
            constraints,
            immediate,
            state: ProcessState::Requested,
            assigned: None,
            round: 0,
        }
    }
}

/// A single EE's view of its own capacity and placement-relevant
/// properties, keyed by `ee_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEngineResource {
    pub ee_id: String,
    pub node_id: String,
    pub slot_count: u32,
    pub properties: PropertyMap,
    pub enabled: bool,
    /// Upids the EE has acknowledged as running on it.
    pub processes: Vec<String>,
    /// Upids dispatched but not yet acknowledged by a heartbeat.
    pub pending: Vec<String>,
}

impl ExecutionEngineResource {
    /// `enabled ? max(0, slot_count - processes.len() - pending.len()) : 0`.
    pub fn available_slots(&self) -> u32 {
        if !self.enabled {
            return 0;
        }
        let used = (self.processes.len() + self.pending.len()) as u32;
        self.slot_count.saturating_sub(used)
    }
}

/// A node hosting zero or more EE resources. Nodes own no pointers to
/// their resources beyond the id list; resources live in a single table
/// keyed by `ee_id` to avoid a reference cycle (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployedNode {
    pub node_id: String,
    pub dt: String,
    pub state: InstanceState,
    pub properties: PropertyMap,
    pub resource_ids: Vec<String>,
}

/// FIFO of upids waiting for a matching resource.
pub type Queue = VecDeque<String>;

/// The EE heartbeat's `processes[*].state` field is reported either as a
/// single state token or, for compound/in-flight reports, a list of
/// tokens joined conceptually with `-`. Serde's untagged matching picks
/// whichever shape the payload actually has.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireProcessState {
    Single(ProcessState),
    Compound(Vec<ProcessState>),
}

impl WireProcessState {
    /// Collapse to the effective `ProcessState` used for all control-flow
    /// decisions (the first element when compound) plus a dash-joined
    /// string of every element, kept only for diagnostics/logging.
    pub fn normalize(&self) -> (ProcessState, String) {
        match self {
            WireProcessState::Single(s) => (*s, format!("{s:?}")),
            WireProcessState::Compound(list) => {
                let joined = list.iter().map(|s| format!("{s:?}")).collect::<Vec<_>>().join("-");
                let effective = list.first().copied().unwrap_or(ProcessState::Requested);
                (effective, joined)
            }
        }
    }
}

/// One process entry inside an EE heartbeat payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessHeartbeatEntry {
    pub upid: String,
    pub round: u32,
    pub state: WireProcessState,
}

/// Full EE heartbeat payload (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EeHeartbeat {
    pub node_id: Option<String>,
    pub timestamp: u64,
    pub processes: Vec<ProcessHeartbeatEntry>,
    pub slot_count: u32,
}
