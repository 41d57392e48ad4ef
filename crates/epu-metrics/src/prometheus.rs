//! Prometheus text exposition format for an EPUM/PDC [`MetricsSnapshot`].

use crate::MetricsSnapshot;

/// Render a snapshot into the Prometheus text exposition format.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();

    out.push_str("# HELP epu_domain_valid_instances Current valid instance count for the domain.\n");
    out.push_str("# TYPE epu_domain_valid_instances gauge\n");
    for d in &snapshot.domains {
        out.push_str(&format!(
            "epu_domain_valid_instances{{owner=\"{}\",domain=\"{}\"}} {}\n",
            d.owner, d.domain_id, d.valid_instances
        ));
    }

    out.push_str("# HELP epu_domain_preserve_n Configured preserve_n target for the domain.\n");
    out.push_str("# TYPE epu_domain_preserve_n gauge\n");
    for d in &snapshot.domains {
        if let Some(n) = d.preserve_n {
            out.push_str(&format!(
                "epu_domain_preserve_n{{owner=\"{}\",domain=\"{}\"}} {}\n",
                d.owner, d.domain_id, n
            ));
        }
    }

    out.push_str("# HELP epu_decide_cycle_duration_ms Decide-cycle duration percentiles.\n");
    out.push_str("# TYPE epu_decide_cycle_duration_ms gauge\n");
    for d in &snapshot.domains {
        out.push_str(&format!(
            "epu_decide_cycle_duration_ms{{owner=\"{}\",domain=\"{}\",quantile=\"0.5\"}} {:.3}\n",
            d.owner, d.domain_id, d.decide_cycle_p50_ms
        ));
        out.push_str(&format!(
            "epu_decide_cycle_duration_ms{{owner=\"{}\",domain=\"{}\",quantile=\"0.99\"}} {:.3}\n",
            d.owner, d.domain_id, d.decide_cycle_p99_ms
        ));
    }

    out.push_str("# HELP epu_pdc_queue_depth Current PDC waiting-queue depth.\n");
    out.push_str("# TYPE epu_pdc_queue_depth gauge\n");
    out.push_str(&format!("epu_pdc_queue_depth {}\n", snapshot.pdc.queue_depth));

    out.push_str("# HELP epu_pdc_matchmake_success_total Successful matchmake outcomes in the last interval.\n");
    out.push_str("# TYPE epu_pdc_matchmake_success_total counter\n");
    out.push_str(&format!("epu_pdc_matchmake_success_total {}\n", snapshot.pdc.matchmake_success));

    out.push_str("# HELP epu_pdc_matchmake_reject_total Rejected/queued matchmake outcomes in the last interval.\n");
    out.push_str("# TYPE epu_pdc_matchmake_reject_total counter\n");
    out.push_str(&format!("epu_pdc_matchmake_reject_total {}\n", snapshot.pdc.matchmake_reject));

    out.push_str("# HELP epu_pdc_heartbeat_latency_ms ee_heartbeat processing latency percentiles.\n");
    out.push_str("# TYPE epu_pdc_heartbeat_latency_ms gauge\n");
    out.push_str(&format!(
        "epu_pdc_heartbeat_latency_ms{{quantile=\"0.5\"}} {:.3}\n",
        snapshot.pdc.heartbeat_p50_ms
    ));
    out.push_str(&format!(
        "epu_pdc_heartbeat_latency_ms{{quantile=\"0.99\"}} {:.3}\n",
        snapshot.pdc.heartbeat_p99_ms
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DomainMetricsSnapshot, PdcMetricsSnapshot};

    fn test_snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            epoch: 1000,
            domains: vec![DomainMetricsSnapshot {
                owner: "owner1".to_string(),
                domain_id: "dom1".to_string(),
                valid_instances: 2,
                preserve_n: Some(2),
                decide_cycle_p50_ms: 1.5,
                decide_cycle_p99_ms: 4.2,
                decide_cycle_count: 10,
            }],
            pdc: PdcMetricsSnapshot {
                queue_depth: 3,
                matchmake_success: 12,
                matchmake_reject: 1,
                heartbeat_p50_ms: 0.8,
                heartbeat_p99_ms: 2.1,
                heartbeat_count: 50,
            },
        }
    }

    #[test]
    fn render_includes_domain_and_pdc_metrics() {
        let output = render_prometheus(&test_snapshot());
        assert!(output.contains("epu_domain_valid_instances{owner=\"owner1\",domain=\"dom1\"} 2"));
        assert!(output.contains("epu_domain_preserve_n{owner=\"owner1\",domain=\"dom1\"} 2"));
        assert!(output.contains("epu_pdc_queue_depth 3"));
        assert!(output.contains("epu_pdc_matchmake_success_total 12"));
        assert!(output.contains("epu_pdc_matchmake_reject_total 1"));
    }

    #[test]
    fn render_empty_snapshot_still_has_type_declarations() {
        let snapshot = MetricsSnapshot {
            epoch: 0,
            domains: vec![],
            pdc: PdcMetricsSnapshot {
                queue_depth: 0,
                matchmake_success: 0,
                matchmake_reject: 0,
                heartbeat_p50_ms: 0.0,
                heartbeat_p99_ms: 0.0,
                heartbeat_count: 0,
            },
        };
        let output = render_prometheus(&snapshot);
        assert!(output.contains("# TYPE epu_pdc_queue_depth gauge"));
    }

    #[test]
    fn missing_preserve_n_omits_the_gauge_line_for_that_domain() {
        let mut snapshot = test_snapshot();
        snapshot.domains[0].preserve_n = None;
        let output = render_prometheus(&snapshot);
        assert!(!output.contains("epu_domain_preserve_n{"));
    }
}
