//! Prometheus metrics definitions for the control plane.
//!
//! All metrics use the `tradeplane_` prefix and are read-only.

use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

/// Prometheus metrics shared across services.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Orders submitted, by side and final submit outcome
    pub orders_total: CounterVec,
    /// Duplicate submissions short-circuited before any broker call
    pub duplicate_submits_total: CounterVec,
    /// Broker call retries, by reason (timeout / http_5xx / transport)
    pub broker_retries_total: CounterVec,
    /// Webhook events ingested, by type and disposition (applied / replay / unknown_order)
    pub webhook_events_total: CounterVec,
    /// Circuit breaker state (0=open, 1=tripped, 2=quiet_period)
    pub circuit_breaker_state: GenericGauge<AtomicF64>,
    /// Breaker trips today
    pub circuit_breaker_trips_today: GenericGauge<AtomicF64>,
    /// 1 when the coordination store could not be read by this worker
    pub coordination_read_failed: GenericGauge<AtomicF64>,
    /// Reconciled gate per service (1=gate set)
    pub reconciled_gate: GenericGaugeVec<AtomicF64>,
    /// Reconcile passes, by outcome
    pub reconcile_runs_total: CounterVec,
    /// Stale orders cancelled by the sweeper
    pub stale_orders_swept_total: CounterVec,
    /// Loaded model version info gauge (value fixed at 1, version as label)
    pub model_info: GenericGaugeVec<AtomicF64>,
    /// Model reloads, by outcome (swapped / unchanged / failed)
    pub model_reloads_total: CounterVec,
    /// Signal generation requests, by outcome
    pub signal_requests_total: CounterVec,
    /// Risk plan rejections, by reason
    pub risk_rejections_total: CounterVec,
    /// Orchestrator runs, by outcome
    pub runs_total: CounterVec,
    /// Broker API latency
    pub broker_latency_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_total = CounterVec::new(
            Opts::new("tradeplane_orders_total", "Orders submitted by side and outcome"),
            &["side", "outcome"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let duplicate_submits_total = CounterVec::new(
            Opts::new(
                "tradeplane_duplicate_submits_total",
                "Submissions answered from the existing order row",
            ),
            &["source"],
        )?;
        registry.register(Box::new(duplicate_submits_total.clone()))?;

        let broker_retries_total = CounterVec::new(
            Opts::new("tradeplane_broker_retries_total", "Broker call retries by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(broker_retries_total.clone()))?;

        let webhook_events_total = CounterVec::new(
            Opts::new(
                "tradeplane_webhook_events_total",
                "Webhook events by type and disposition",
            ),
            &["event_type", "disposition"],
        )?;
        registry.register(Box::new(webhook_events_total.clone()))?;

        let circuit_breaker_state = Gauge::with_opts(Opts::new(
            "tradeplane_circuit_breaker_state",
            "Circuit breaker state (0=open, 1=tripped, 2=quiet_period)",
        ))?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_trips_today = Gauge::with_opts(Opts::new(
            "tradeplane_circuit_breaker_trips_today",
            "Number of breaker trips today",
        ))?;
        registry.register(Box::new(circuit_breaker_trips_today.clone()))?;

        let coordination_read_failed = Gauge::with_opts(Opts::new(
            "tradeplane_coordination_read_failed",
            "1 when this worker cannot read breaker state from the coordination store",
        ))?;
        registry.register(Box::new(coordination_read_failed.clone()))?;

        let reconciled_gate = GaugeVec::new(
            Opts::new("tradeplane_reconciled_gate", "Reconciled gate per service (1=set)"),
            &["service"],
        )?;
        registry.register(Box::new(reconciled_gate.clone()))?;

        let reconcile_runs_total = CounterVec::new(
            Opts::new("tradeplane_reconcile_runs_total", "Reconcile passes by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(reconcile_runs_total.clone()))?;

        let stale_orders_swept_total = CounterVec::new(
            Opts::new(
                "tradeplane_stale_orders_swept_total",
                "Stale orders cancelled by the sweeper",
            ),
            &["symbol"],
        )?;
        registry.register(Box::new(stale_orders_swept_total.clone()))?;

        let model_info = GaugeVec::new(
            Opts::new("tradeplane_model_info", "Loaded model version (value always 1)"),
            &["strategy", "version"],
        )?;
        registry.register(Box::new(model_info.clone()))?;

        let model_reloads_total = CounterVec::new(
            Opts::new("tradeplane_model_reloads_total", "Registry polls by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(model_reloads_total.clone()))?;

        let signal_requests_total = CounterVec::new(
            Opts::new("tradeplane_signal_requests_total", "Signal requests by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(signal_requests_total.clone()))?;

        let risk_rejections_total = CounterVec::new(
            Opts::new("tradeplane_risk_rejections_total", "Risk plan rejections by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(risk_rejections_total.clone()))?;

        let runs_total = CounterVec::new(
            Opts::new("tradeplane_runs_total", "Orchestrator runs by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(runs_total.clone()))?;

        let broker_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tradeplane_broker_latency_seconds",
                "Broker API latency in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["endpoint"],
        )?;
        registry.register(Box::new(broker_latency_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            orders_total,
            duplicate_submits_total,
            broker_retries_total,
            webhook_events_total,
            circuit_breaker_state,
            circuit_breaker_trips_today,
            coordination_read_failed,
            reconciled_gate,
            reconcile_runs_total,
            stale_orders_swept_total,
            model_info,
            model_reloads_total,
            signal_requests_total,
            risk_rejections_total,
            runs_total,
            broker_latency_seconds,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn set_breaker_state(&self, state: crate::domain::circuit::BreakerState) {
        use crate::domain::circuit::BreakerState;
        let value = match state {
            BreakerState::Open => 0.0,
            BreakerState::Tripped => 1.0,
            BreakerState::QuietPeriod => 2.0,
        };
        self.circuit_breaker_state.set(value);
    }

    pub fn set_reconciled_gate(&self, service: &str, set: bool) {
        self.reconciled_gate
            .with_label_values(&[service])
            .set(if set { 1.0 } else { 0.0 });
    }

    pub fn set_model_info(&self, strategy: &str, version: &str) {
        self.model_info
            .with_label_values(&[strategy, version])
            .set(1.0);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default Metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::circuit::BreakerState;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        assert!(metrics.render().contains("tradeplane_"));
    }

    #[test]
    fn test_breaker_state_gauge() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.set_breaker_state(BreakerState::Tripped);
        assert!(metrics.render().contains("tradeplane_circuit_breaker_state 1"));
        metrics.set_breaker_state(BreakerState::QuietPeriod);
        assert!(metrics.render().contains("tradeplane_circuit_breaker_state 2"));
    }

    #[test]
    fn test_reconciled_gate_per_service() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.set_reconciled_gate("execution", true);
        metrics.set_reconciled_gate("signals", false);
        let output = metrics.render();
        assert!(output.contains("tradeplane_reconciled_gate"));
        assert!(output.contains("execution"));
    }
}
