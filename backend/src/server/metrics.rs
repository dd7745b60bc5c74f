//! Optional Prometheus middleware and `/metrics` endpoint.
//!
//! The middleware is type-erased so the same `App` type is produced whether
//! or not a registry was configured.

use std::sync::Arc;

use actix_service::{
    Service, ServiceExt as _, Transform,
    boxed::{self, BoxService},
};
use actix_web::body::BoxBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::middleware::Compat;
use actix_web_prom::{PrometheusMetrics, PrometheusMetricsBuilder};
use futures_util::future::LocalBoxFuture;

/// Namespace prefixed to the HTTP metrics recorded by the middleware.
pub const METRICS_NAMESPACE: &str = "booking_relay";

const METRICS_PATH: &str = "/metrics";

/// Probe traffic is steady and uninteresting; keep it out of the histograms.
const UNRECORDED_PATHS: [&str; 3] = ["/health/ready", "/health/live", METRICS_PATH];

/// Build the HTTP metrics middleware serving `/metrics`.
///
/// The returned registry is also handed to the idempotency metrics adapter,
/// so one scrape covers both.
///
/// # Errors
///
/// Returns the builder error when the registry rejects a metric.
pub fn prometheus_metrics()
-> Result<PrometheusMetrics, Box<dyn std::error::Error + Send + Sync>> {
    UNRECORDED_PATHS
        .iter()
        .fold(
            PrometheusMetricsBuilder::new(METRICS_NAMESPACE).endpoint(METRICS_PATH),
            |builder, path| builder.exclude(*path),
        )
        .build()
}

#[derive(Clone)]
pub(crate) enum MetricsLayer {
    Enabled(Arc<PrometheusMetrics>),
    Disabled,
}

impl MetricsLayer {
    pub(crate) fn from_option(metrics: Option<PrometheusMetrics>) -> Self {
        metrics.map_or(Self::Disabled, |metrics| Self::Enabled(Arc::new(metrics)))
    }
}

impl<S, B> Transform<S, ServiceRequest> for MetricsLayer
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = BoxService<ServiceRequest, ServiceResponse<BoxBody>, actix_web::Error>;
    type Future = LocalBoxFuture<'static, Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        match self.clone() {
            Self::Enabled(metrics) => {
                let fut = Compat::new((*metrics).clone()).new_transform(service);
                Box::pin(async move { Ok(boxed::service(fut.await?)) })
            }
            Self::Disabled => Box::pin(async move {
                let svc = service.map(|res: ServiceResponse<B>| res.map_into_boxed_body());
                Ok(boxed::service(svc))
            }),
        }
    }
}
