//! Prometheus metrics, exposed to callers via `GET /metrics` (§6).

pub mod latency_tracker;
pub mod metrics;

pub use latency_tracker::LatencyGuard;
pub use metrics::Metrics;
