//! Metrics collector — aggregates decide-cycle, matchmake, and heartbeat
//! timings, and derives per-domain convergence state from the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info};

use epu_core::types::InstanceState;
use epu_store::EpumStore;

use crate::{DomainMetricsSnapshot, MetricsSnapshot, PdcMetricsSnapshot};

/// Decide-cycle latency samples for a single domain.
struct DomainBucket {
    latencies_us: Mutex<Vec<u64>>,
}

impl DomainBucket {
    fn new() -> Self {
        Self {
            latencies_us: Mutex::new(Vec::new()),
        }
    }
}

/// Collects EPUM decide-cycle and PDC dispatch/heartbeat metrics across
/// the process lifetime and renders periodic snapshots.
pub struct MetricsCollector {
    store: EpumStore,
    interval: Duration,
    domains: RwLock<HashMap<(String, String), Arc<DomainBucket>>>,
    matchmake_success: AtomicU64,
    matchmake_reject: AtomicU64,
    queue_depth: AtomicU64,
    heartbeat_latencies_us: Mutex<Vec<u64>>,
}

impl MetricsCollector {
    pub fn new(store: EpumStore, interval: Duration) -> Self {
        Self {
            store,
            interval,
            domains: RwLock::new(HashMap::new()),
            matchmake_success: AtomicU64::new(0),
            matchmake_reject: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            heartbeat_latencies_us: Mutex::new(Vec::new()),
        }
    }

    /// Record one decide-cycle's wall-clock duration for a domain.
    pub async fn record_decide_cycle(&self, owner: &str, domain_id: &str, duration_us: u64) {
        let bucket = {
            let domains = self.domains.read().await;
            domains.get(&(owner.to_string(), domain_id.to_string())).cloned()
        };
        let bucket = match bucket {
            Some(b) => b,
            None => {
                let mut domains = self.domains.write().await;
                domains
                    .entry((owner.to_string(), domain_id.to_string()))
                    .or_insert_with(|| Arc::new(DomainBucket::new()))
                    .clone()
            }
        };
        bucket.latencies_us.lock().await.push(duration_us);
    }

    /// Record the outcome of one matchmake attempt (dispatch or rematch).
    pub fn record_matchmake(&self, matched: bool) {
        if matched {
            self.matchmake_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.matchmake_reject.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Set the current PDC queue depth (a gauge, not a counter).
    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    /// Record one `ee_heartbeat` call's processing latency.
    pub async fn record_heartbeat_latency(&self, latency_us: u64) {
        self.heartbeat_latencies_us.lock().await.push(latency_us);
    }

    /// Scan the store for every domain, computing valid-instance count and
    /// configured `preserve_n`, and combine with the accumulated timing
    /// samples into one snapshot. Timing samples are reset afterward so
    /// each snapshot reflects only the preceding interval.
    pub async fn snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let epoch = epoch_secs();
        let all_domains = self.store.list_all_domains()?;

        let mut domain_snapshots = Vec::with_capacity(all_domains.len());
        for domain in &all_domains {
            let instances = self.store.get_instances(&domain.owner, &domain.domain_id)?;
            let valid_instances =
                instances.iter().filter(|i| i.state != InstanceState::Terminating
                    && i.state != InstanceState::Terminated
                    && i.state != InstanceState::Failed).count() as u64;
            let preserve_n = domain
                .config
                .engine
                .get("preserve_n")
                .and_then(|v| v.as_i64());

            let key = (domain.owner.clone(), domain.domain_id.clone());
            let (p50, p99, count) = {
                let domains = self.domains.read().await;
                match domains.get(&key) {
                    Some(bucket) => {
                        let mut latencies = bucket.latencies_us.lock().await;
                        let (p50, p99) = compute_percentiles(&latencies);
                        let count = latencies.len() as u64;
                        latencies.clear();
                        (p50, p99, count)
                    }
                    None => (0.0, 0.0, 0),
                }
            };

            domain_snapshots.push(DomainMetricsSnapshot {
                owner: domain.owner.clone(),
                domain_id: domain.domain_id.clone(),
                valid_instances,
                preserve_n,
                decide_cycle_p50_ms: p50,
                decide_cycle_p99_ms: p99,
                decide_cycle_count: count,
            });
        }

        let (heartbeat_p50, heartbeat_p99, heartbeat_count) = {
            let mut latencies = self.heartbeat_latencies_us.lock().await;
            let (p50, p99) = compute_percentiles(&latencies);
            let count = latencies.len() as u64;
            latencies.clear();
            (p50, p99, count)
        };

        let snapshot = MetricsSnapshot {
            epoch,
            domains: domain_snapshots,
            pdc: PdcMetricsSnapshot {
                queue_depth: self.queue_depth.load(Ordering::Relaxed),
                matchmake_success: self.matchmake_success.swap(0, Ordering::Relaxed),
                matchmake_reject: self.matchmake_reject.swap(0, Ordering::Relaxed),
                heartbeat_p50_ms: heartbeat_p50,
                heartbeat_p99_ms: heartbeat_p99,
                heartbeat_count,
            },
        };

        debug!(domains = snapshot.domains.len(), epoch, "metrics snapshot taken");
        Ok(snapshot)
    }

    /// Run the periodic snapshot loop until shutdown signal, logging each
    /// interval's snapshot at `info` so an operator can tail logs without
    /// scraping `/metrics`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "metrics collector started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    match self.snapshot().await {
                        Ok(snapshot) => info!(
                            domains = snapshot.domains.len(),
                            queue_depth = snapshot.pdc.queue_depth,
                            "metrics snapshot"
                        ),
                        Err(e) => tracing::warn!(error = %e, "metrics snapshot failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("metrics collector shutting down");
                    break;
                }
            }
        }
    }
}

/// Compute P50 and P99 latency (microseconds → milliseconds). Empty input
/// yields `(0.0, 0.0)`.
fn compute_percentiles(latencies: &[u64]) -> (f64, f64) {
    if latencies.is_empty() {
        return (0.0, 0.0);
    }
    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();
    let p50_idx = (sorted.len() as f64 * 0.50) as usize;
    let p99_idx = (sorted.len() as f64 * 0.99) as usize;
    let p50 = sorted[p50_idx.min(sorted.len() - 1)] as f64 / 1000.0;
    let p99 = sorted[p99_idx.min(sorted.len() - 1)] as f64 / 1000.0;
    (p50, p99)
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use epu_store::DomainConfig;

    fn test_store() -> EpumStore {
        EpumStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn matchmake_counters_accumulate_and_reset_on_snapshot() {
        let collector = MetricsCollector::new(test_store(), Duration::from_secs(60));
        collector.record_matchmake(true);
        collector.record_matchmake(true);
        collector.record_matchmake(false);

        let snap = collector.snapshot().await.unwrap();
        assert_eq!(snap.pdc.matchmake_success, 2);
        assert_eq!(snap.pdc.matchmake_reject, 1);

        // Counters reset after a snapshot.
        let snap2 = collector.snapshot().await.unwrap();
        assert_eq!(snap2.pdc.matchmake_success, 0);
        assert_eq!(snap2.pdc.matchmake_reject, 0);
    }

    #[tokio::test]
    async fn queue_depth_is_a_gauge_not_reset() {
        let collector = MetricsCollector::new(test_store(), Duration::from_secs(60));
        collector.set_queue_depth(5);
        let snap = collector.snapshot().await.unwrap();
        assert_eq!(snap.pdc.queue_depth, 5);
        let snap2 = collector.snapshot().await.unwrap();
        assert_eq!(snap2.pdc.queue_depth, 5);
    }

    #[tokio::test]
    async fn heartbeat_latency_percentiles_computed_and_reset() {
        let collector = MetricsCollector::new(test_store(), Duration::from_secs(60));
        for i in 1..=100u64 {
            collector.record_heartbeat_latency(i * 1000).await;
        }
        let snap = collector.snapshot().await.unwrap();
        assert!(snap.pdc.heartbeat_p50_ms >= 49.0 && snap.pdc.heartbeat_p50_ms <= 51.0);
        assert_eq!(snap.pdc.heartbeat_count, 100);

        let snap2 = collector.snapshot().await.unwrap();
        assert_eq!(snap2.pdc.heartbeat_count, 0);
    }

    #[tokio::test]
    async fn domain_snapshot_reports_valid_instances_and_preserve_n() {
        let store = test_store();
        let mut config = DomainConfig::default();
        config.engine.insert("preserve_n".to_string(), serde_json::json!(3));
        store.add_domain("owner1", "dom1", config, None).unwrap();

        let collector = MetricsCollector::new(store, Duration::from_secs(60));
        let snap = collector.snapshot().await.unwrap();
        assert_eq!(snap.domains.len(), 1);
        assert_eq!(snap.domains[0].preserve_n, Some(3));
        assert_eq!(snap.domains[0].valid_instances, 0);
    }

    #[tokio::test]
    async fn decide_cycle_latency_tracked_per_domain() {
        let collector = MetricsCollector::new(test_store(), Duration::from_secs(60));
        collector.record_decide_cycle("owner1", "dom1", 5_000).await;
        collector.record_decide_cycle("owner1", "dom1", 15_000).await;

        let snap = collector.snapshot().await.unwrap();
        // No domain row exists in the store, so `domains` scan is empty —
        // decide-cycle timing alone does not synthesize a domain entry.
        assert!(snap.domains.is_empty());
    }
}
