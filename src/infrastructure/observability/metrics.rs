//! Process metrics for the webhook gateway.
//!
//! All metrics use the `gateway_` prefix. Nothing here is exposed over
//! HTTP; [`super::reporter::MetricsReporter`] reads these gauges and
//! counters and logs a periodic summary instead.

use prometheus::{
    CounterVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub webhooks_received_total: CounterVec,
    pub webhooks_accepted_total: CounterVec,
    pub webhooks_blocked_total: CounterVec,
    pub webhooks_failed_total: CounterVec,
    pub brackets_placed_total: CounterVec,
    pub brackets_partial_total: CounterVec,
    pub unprotected_position_total: CounterVec,
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let webhooks_received_total = CounterVec::new(
            Opts::new(
                "gateway_webhooks_received_total",
                "Total webhook requests received, by account",
            ),
            &["account"],
        )?;
        registry.register(Box::new(webhooks_received_total.clone()))?;

        let webhooks_accepted_total = CounterVec::new(
            Opts::new(
                "gateway_webhooks_accepted_total",
                "Webhooks that resulted in an order attempt, by account and action",
            ),
            &["account", "action"],
        )?;
        registry.register(Box::new(webhooks_accepted_total.clone()))?;

        let webhooks_blocked_total = CounterVec::new(
            Opts::new(
                "gateway_webhooks_blocked_total",
                "Webhooks blocked by the risk manager, by reason",
            ),
            &["account", "reason"],
        )?;
        registry.register(Box::new(webhooks_blocked_total.clone()))?;

        let webhooks_failed_total = CounterVec::new(
            Opts::new(
                "gateway_webhooks_failed_total",
                "Webhooks that failed for a reason other than a risk block",
            ),
            &["account", "reason"],
        )?;
        registry.register(Box::new(webhooks_failed_total.clone()))?;

        let brackets_placed_total = CounterVec::new(
            Opts::new(
                "gateway_brackets_placed_total",
                "Bracket orders fully placed (entry + stop + target)",
            ),
            &["account"],
        )?;
        registry.register(Box::new(brackets_placed_total.clone()))?;

        let brackets_partial_total = CounterVec::new(
            Opts::new(
                "gateway_brackets_partial_total",
                "Bracket orders placed with the take-profit leg missing",
            ),
            &["account"],
        )?;
        registry.register(Box::new(brackets_partial_total.clone()))?;

        let unprotected_position_total = CounterVec::new(
            Opts::new(
                "gateway_unprotected_position_total",
                "Entries filled whose protective stop failed to place",
            ),
            &["account"],
        )?;
        registry.register(Box::new(unprotected_position_total.clone()))?;

        let uptime_seconds =
            prometheus::Gauge::with_opts(Opts::new("gateway_uptime_seconds", "Server uptime"))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            webhooks_received_total,
            webhooks_accepted_total,
            webhooks_blocked_total,
            webhooks_failed_total,
            brackets_placed_total,
            brackets_partial_total,
            unprotected_position_total,
            uptime_seconds,
        })
    }

    /// Render all metrics in Prometheus text format. Used by tests and
    /// by the reporter's internal snapshot; never exposed over HTTP.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    /// Raw Prometheus metric families, for the reporter's JSON snapshot.
    pub fn render_families(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    pub fn inc_received(&self, account: &str) {
        self.webhooks_received_total
            .with_label_values(&[account])
            .inc();
    }

    pub fn inc_accepted(&self, account: &str, action: &str) {
        self.webhooks_accepted_total
            .with_label_values(&[account, action])
            .inc();
    }

    pub fn inc_blocked(&self, account: &str, reason: &str) {
        self.webhooks_blocked_total
            .with_label_values(&[account, reason])
            .inc();
    }

    pub fn inc_failed(&self, account: &str, reason: &str) {
        self.webhooks_failed_total
            .with_label_values(&[account, reason])
            .inc();
    }

    pub fn inc_bracket_placed(&self, account: &str) {
        self.brackets_placed_total
            .with_label_values(&[account])
            .inc();
    }

    pub fn inc_bracket_partial(&self, account: &str) {
        self.brackets_partial_total
            .with_label_values(&[account])
            .inc();
    }

    pub fn inc_unprotected_position(&self, account: &str) {
        self.unprotected_position_total
            .with_label_values(&[account])
            .inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to construct default metrics registry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_gateway_prefixed_metrics() {
        let metrics = Metrics::new().unwrap();
        assert!(metrics.render().contains("gateway_"));
    }

    #[test]
    fn counts_blocked_by_reason() {
        let metrics = Metrics::new().unwrap();
        metrics.inc_blocked("acct-1", "duplicate");
        metrics.inc_blocked("acct-1", "duplicate");
        metrics.inc_blocked("acct-1", "max_trades");
        let output = metrics.render();
        assert!(output.contains("gateway_webhooks_blocked_total"));
        assert!(output.contains("duplicate"));
        assert!(output.contains("max_trades"));
    }

    #[test]
    fn counts_unprotected_positions() {
        let metrics = Metrics::new().unwrap();
        metrics.inc_unprotected_position("acct-1");
        assert!(metrics.render().contains("gateway_unprotected_position_total"));
    }
}
