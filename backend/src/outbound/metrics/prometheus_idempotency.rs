//! Prometheus counters for idempotency guard outcomes.
//!
//! Registered on the same registry as the HTTP middleware, so both appear on
//! `/metrics`.

use async_trait::async_trait;
use prometheus::{IntCounterVec, Opts, Registry};

use crate::domain::ports::{
    GuardOutcome, IdempotencyMetricLabels, IdempotencyMetrics, IdempotencyMetricsError,
};

const REQUESTS_TOTAL: &str = "booking_relay_idempotency_requests_total";
const NOT_APPLICABLE: &str = "n/a";

/// `booking_relay_idempotency_requests_total`, labelled by:
///
/// - `outcome`: `miss`, `hit`, `takeover` or `conflict`
/// - `conflict_reason`: `key_reuse`, `in_flight`, or `n/a`
/// - `tenant_scope`: 8-character hash of the tenant id
/// - `endpoint`: e.g. `create_booking`
/// - `age_bucket`: `0-1m` .. `6h-24h`, or `n/a` on a miss
pub struct PrometheusIdempotencyMetrics {
    requests_total: IntCounterVec,
}

impl PrometheusIdempotencyMetrics {
    /// # Errors
    ///
    /// Fails when `registry` already holds a collector with the same name.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests_total = IntCounterVec::new(
            Opts::new(REQUESTS_TOTAL, "Idempotency-guarded requests by guard outcome"),
            &[
                "outcome",
                "conflict_reason",
                "tenant_scope",
                "endpoint",
                "age_bucket",
            ],
        )?;
        registry.register(Box::new(requests_total.clone()))?;
        Ok(Self { requests_total })
    }
}

#[async_trait]
impl IdempotencyMetrics for PrometheusIdempotencyMetrics {
    async fn record(
        &self,
        outcome: GuardOutcome,
        labels: &IdempotencyMetricLabels,
    ) -> Result<(), IdempotencyMetricsError> {
        self.requests_total
            .get_metric_with_label_values(&[
                outcome.as_str(),
                outcome.conflict_reason().unwrap_or(NOT_APPLICABLE),
                &labels.tenant_scope,
                &labels.endpoint,
                labels.age_bucket.as_deref().unwrap_or(NOT_APPLICABLE),
            ])
            .map_err(|err| IdempotencyMetricsError::export(err.to_string()))?
            .inc();
        Ok(())
    }
}
