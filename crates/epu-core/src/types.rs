//! Core enums and small value types shared by every EPUM/PDC crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of a provisioned VM instance.
///
/// Ordered and monotone non-decreasing: callers must reject any attempt
/// to move an instance backward in this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Requesting,
    Requested,
    Pending,
    Running,
    Terminating,
    Terminated,
    Failed,
}

impl InstanceState {
    /// An instance counts toward `preserve_n` unless it has reached one of
    /// these terminal-or-terminating states.
    pub fn is_valid(self) -> bool {
        !matches!(
            self,
            InstanceState::Terminating | InstanceState::Terminated | InstanceState::Failed
        )
    }
}

/// Health as reported by heartbeats, independent of `InstanceState`.
///
/// `Zombie` is only assignable when the owning instance's state is at or
/// past `Terminated` and a heartbeat still arrives for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InstanceHealthState {
    Unknown,
    Ok,
    Missing,
    Error,
    Zombie,
}

/// Lifecycle state of a dispatched process.
///
/// `DiedRequested` is a resurrection marker, not a pure ordinal step: the
/// source compares it against `Terminating` in some paths while using it
/// elsewhere to mean "still alive, needs rescheduling". Encode that via
/// [`needs_reschedule`] rather than deriving `Ord` on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Requested,
    Waiting,
    Pending,
    Running,
    Terminating,
    Terminated,
    Failed,
    Rejected,
    DiedRequested,
}

impl ProcessState {
    /// Ordinal rank used for "≤"/"≥" checks against `Requested..Rejected`.
    /// `DiedRequested` ranks alongside `Pending`/`Running` for this purpose —
    /// see [`ProcessState`] doc comment.
    fn rank(self) -> u8 {
        match self {
            ProcessState::Requested => 0,
            ProcessState::Waiting => 1,
            ProcessState::Pending => 2,
            ProcessState::DiedRequested => 3,
            ProcessState::Running => 3,
            ProcessState::Terminating => 4,
            ProcessState::Terminated => 5,
            ProcessState::Failed => 6,
            ProcessState::Rejected => 7,
        }
    }

    pub fn at_least(self, other: ProcessState) -> bool {
        self.rank() >= other.rank()
    }

    pub fn at_most(self, other: ProcessState) -> bool {
        self.rank() <= other.rank()
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessState::Terminated | ProcessState::Failed | ProcessState::Rejected
        )
    }

    /// True when a process in this state has lost its resource and must be
    /// matchmade again, rather than being finished for good.
    pub fn needs_reschedule(self) -> bool {
        matches!(self, ProcessState::DiedRequested)
    }

    /// `process.assigned` must be null in exactly these states.
    pub fn is_unassigned(self) -> bool {
        matches!(
            self,
            ProcessState::Requested
                | ProcessState::Waiting
                | ProcessState::Rejected
                | ProcessState::DiedRequested
                | ProcessState::Terminated
                | ProcessState::Failed
        )
    }
}

/// A reduced, externally observable instance-state notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReducedState {
    Running,
    Failed,
}

/// Classify a raw `InstanceState` transition per the reactor's notify rule:
/// `state < Running` is silent, `state == Running` notifies `Running`,
/// `state > Running` notifies `Failed`.
pub fn classify_for_notify(state: InstanceState) -> Option<ReducedState> {
    match state.cmp(&InstanceState::Running) {
        std::cmp::Ordering::Less => None,
        std::cmp::Ordering::Equal => Some(ReducedState::Running),
        std::cmp::Ordering::Greater => Some(ReducedState::Failed),
    }
}

/// Named template describing a VM image + contextualization.
pub type DeployableType = String;

/// Static per-deployable-type engine description, loaded from config at
/// startup and held read-only for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSpec {
    pub deployable_type: DeployableType,
    pub engine_id: String,
    pub slots: u32,
    pub base_need: u32,
}

/// Arbitrary string-keyed properties attached to instances, resources, and
/// constraints (JSON values to allow scalar and list-valued entries).
pub type PropertyMap = HashMap<String, serde_json::Value>;

/// An error record attached to an instance, collected from heartbeats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_time: Option<u64>,
    pub message: String,
}
