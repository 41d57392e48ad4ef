//! `epu-metrics` — observability for the EPUM/PDC control plane (spec §10.3).
//!
//! Tracks per-domain valid-instance-count-vs-`preserve_n` and decide-cycle
//! duration on the EPUM side, and queue depth / matchmake outcome /
//! heartbeat-processing latency on the PDC side, then periodically
//! persists nothing (metrics are process-lifetime only, unlike the
//! domain/instance store) and renders a Prometheus text exposition.
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector
//!   ├── record_decide_cycle()    ← called once per domain per decider tick
//!   ├── record_matchmake()       ← called once per dispatch/rematch attempt
//!   ├── record_heartbeat_latency() ← called once per ee_heartbeat
//!   ├── set_queue_depth()        ← called after each PDC table mutation
//!   ├── snapshot() → MetricsSnapshot (scans the store for valid/preserve_n)
//!   └── run() → periodic log-and-reset loop
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::MetricsCollector;
pub use prometheus::render_prometheus;

use serde::Serialize;

/// One domain's steady-state convergence and decide-cycle timing.
#[derive(Debug, Clone, Serialize)]
pub struct DomainMetricsSnapshot {
    pub owner: String,
    pub domain_id: String,
    pub valid_instances: u64,
    /// `None` when the domain has no `preserve_n` configured (e.g. a
    /// non-Needy engine class).
    pub preserve_n: Option<i64>,
    pub decide_cycle_p50_ms: f64,
    pub decide_cycle_p99_ms: f64,
    pub decide_cycle_count: u64,
}

/// Process-wide Process Dispatcher Core metrics (not per-domain: a single
/// PDC instance serves every domain's heartbeating EEs).
#[derive(Debug, Clone, Serialize)]
pub struct PdcMetricsSnapshot {
    pub queue_depth: u64,
    pub matchmake_success: u64,
    pub matchmake_reject: u64,
    pub heartbeat_p50_ms: f64,
    pub heartbeat_p99_ms: f64,
    pub heartbeat_count: u64,
}

/// A full metrics snapshot, ready for Prometheus exposition or REST
/// introspection.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub epoch: u64,
    pub domains: Vec<DomainMetricsSnapshot>,
    pub pdc: PdcMetricsSnapshot,
}
