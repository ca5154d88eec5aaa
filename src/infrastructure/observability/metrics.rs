//! Prometheus metrics definitions for marketcore.
//!
//! All metrics use the `marketcore_` prefix and are read-only.

use prometheus::{
    CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// 1-minute candles written per instrument, by ingestion outcome.
    pub candles_ingested_total: CounterVec,
    /// 5-minute/daily aggregates produced, by interval.
    pub aggregations_total: CounterVec,
    /// Filter pipeline runs, by stage and verdict.
    pub filter_verdicts_total: CounterVec,
    /// Master-data pipeline step transitions, by step and outcome.
    pub pipeline_steps_total: CounterVec,
    /// Group executions dispatched, by entry type and outcome.
    pub group_executions_total: CounterVec,
    /// BBW alerts emitted, by alert type.
    pub bbw_alerts_total: CounterVec,
    /// Connected broadcast (C12) WebSocket clients.
    pub broadcast_clients_connected: GenericGauge<AtomicF64>,
    /// Batch ingestor request latency.
    pub ingestion_latency_seconds: HistogramVec,
    /// Server uptime in seconds.
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let candles_ingested_total = CounterVec::new(
            Opts::new(
                "marketcore_candles_ingested_total",
                "1-minute candles written, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(candles_ingested_total.clone()))?;

        let aggregations_total = CounterVec::new(
            Opts::new(
                "marketcore_aggregations_total",
                "Aggregated bars produced, by interval",
            ),
            &["interval"],
        )?;
        registry.register(Box::new(aggregations_total.clone()))?;

        let filter_verdicts_total = CounterVec::new(
            Opts::new(
                "marketcore_filter_verdicts_total",
                "Filter pipeline verdicts, by stage and direction",
            ),
            &["stage", "verdict"],
        )?;
        registry.register(Box::new(filter_verdicts_total.clone()))?;

        let pipeline_steps_total = CounterVec::new(
            Opts::new(
                "marketcore_pipeline_steps_total",
                "Master-data pipeline step transitions, by step and outcome",
            ),
            &["step", "outcome"],
        )?;
        registry.register(Box::new(pipeline_steps_total.clone()))?;

        let group_executions_total = CounterVec::new(
            Opts::new(
                "marketcore_group_executions_total",
                "Group executions dispatched, by entry type and outcome",
            ),
            &["entry_type", "outcome"],
        )?;
        registry.register(Box::new(group_executions_total.clone()))?;

        let bbw_alerts_total = CounterVec::new(
            Opts::new(
                "marketcore_bbw_alerts_total",
                "BB-Width pattern alerts emitted, by alert type",
            ),
            &["alert_type"],
        )?;
        registry.register(Box::new(bbw_alerts_total.clone()))?;

        let broadcast_clients_connected = Gauge::with_opts(Opts::new(
            "marketcore_broadcast_clients_connected",
            "Currently connected broadcast WebSocket clients",
        ))?;
        registry.register(Box::new(broadcast_clients_connected.clone()))?;

        let ingestion_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "marketcore_ingestion_latency_seconds",
                "Batch ingestion request latency in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["instrument_key"],
        )?;
        registry.register(Box::new(ingestion_latency_seconds.clone()))?;

        let uptime_seconds =
            Gauge::with_opts(Opts::new("marketcore_uptime_seconds", "Server uptime in seconds"))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            candles_ingested_total,
            aggregations_total,
            filter_verdicts_total,
            pipeline_steps_total,
            group_executions_total,
            bbw_alerts_total,
            broadcast_clients_connected,
            ingestion_latency_seconds,
            uptime_seconds,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    pub fn inc_candles_ingested(&self, outcome: &str) {
        self.candles_ingested_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_aggregations(&self, interval: &str) {
        self.aggregations_total.with_label_values(&[interval]).inc();
    }

    pub fn inc_filter_verdict(&self, stage: &str, verdict: &str) {
        self.filter_verdicts_total.with_label_values(&[stage, verdict]).inc();
    }

    pub fn inc_pipeline_step(&self, step: &str, outcome: &str) {
        self.pipeline_steps_total.with_label_values(&[step, outcome]).inc();
    }

    pub fn inc_group_execution(&self, entry_type: &str, outcome: &str) {
        self.group_executions_total.with_label_values(&[entry_type, outcome]).inc();
    }

    pub fn inc_bbw_alert(&self, alert_type: &str) {
        self.bbw_alerts_total.with_label_values(&[alert_type]).inc();
    }

    pub fn observe_ingestion_latency(&self, instrument_key: &str, latency: f64) {
        self.ingestion_latency_seconds
            .with_label_values(&[instrument_key])
            .observe(latency);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to create default metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_namespace_prefix() {
        let metrics = Metrics::new().unwrap();
        assert!(metrics.render().contains("marketcore_"));
    }

    #[test]
    fn candle_ingestion_counter_increments() {
        let metrics = Metrics::new().unwrap();
        metrics.inc_candles_ingested("stored");
        metrics.inc_candles_ingested("rejected");
        let output = metrics.render();
        assert!(output.contains("marketcore_candles_ingested_total"));
    }

    #[test]
    fn group_execution_counter_carries_labels() {
        let metrics = Metrics::new().unwrap();
        metrics.inc_group_execution("first_entry", "dispatched");
        let output = metrics.render();
        assert!(output.contains("first_entry"));
        assert!(output.contains("dispatched"));
    }
}
