//! Push-based metrics reporter.
//!
//! Periodically emits a single structured `tracing` event summarizing
//! webhook throughput. No HTTP server, no scrape endpoint — outbound
//! data only.

use crate::infrastructure::observability::metrics::Metrics;
use prometheus::proto::MetricFamily;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub counters: Vec<CounterSnapshot>,
}

#[derive(Serialize)]
pub struct CounterSnapshot {
    pub name: String,
    pub total: f64,
}

pub struct MetricsReporter {
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds.max(1)),
        }
    }

    /// Run the reporter loop until the process is shut down. Intended
    /// to be spawned as a background task.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "metrics reporter started");
        loop {
            tokio::time::sleep(self.interval).await;
            let snapshot = self.collect_snapshot();
            match serde_json::to_string(&snapshot) {
                Ok(json) => info!(target: "gateway::metrics", payload = %json, "metrics snapshot"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize metrics snapshot"),
            }
        }
    }

    fn collect_snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed().as_secs();
        self.metrics.uptime_seconds.set(uptime as f64);

        let families = prometheus_families_to_snapshot(&self.metrics);

        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            counters: families,
        }
    }
}

fn prometheus_families_to_snapshot(metrics: &Metrics) -> Vec<CounterSnapshot> {
    let families: Vec<MetricFamily> = metrics.render_families();

    families
        .into_iter()
        .flat_map(|family| {
            let name = family.get_name().to_string();
            family
                .get_metric()
                .iter()
                .map(move |m| CounterSnapshot {
                    name: name.clone(),
                    total: m.get_counter().get_value() + m.get_gauge().get_value(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_includes_counter_totals() {
        let metrics = Metrics::new().unwrap();
        metrics.inc_received("acct-1");
        metrics.inc_received("acct-1");
        let reporter = MetricsReporter::new(metrics, 60);
        let snapshot = reporter.collect_snapshot();
        let received = snapshot
            .counters
            .iter()
            .find(|c| c.name == "gateway_webhooks_received_total");
        assert!(received.is_some());
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let metrics = Metrics::new().unwrap();
        let reporter = MetricsReporter::new(metrics, 60);
        let snapshot = reporter.collect_snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("uptime_seconds"));
    }
}
