//! Prometheus-backed metrics exporters.

mod prometheus_idempotency;

pub use prometheus_idempotency::PrometheusIdempotencyMetrics;
