//! Server construction and middleware wiring.
//!
//! The relay serves health probes and the webhook receiver itself. Business
//! routes belong to the host application: they are mounted under `/api/v1`
//! through [`ApiRoutes`], behind the idempotency guard.

mod config;
#[cfg(feature = "metrics")]
mod metrics;
mod settings;
mod state_builders;

pub use config::ServerConfig;
#[cfg(feature = "metrics")]
pub use metrics::{METRICS_NAMESPACE, prometheus_metrics};
pub use settings::RelaySettings;
pub use state_builders::{RelayRepositories, RelayServices, RelayWiring};

#[cfg(feature = "metrics")]
use metrics::MetricsLayer;

use std::sync::Arc;

use actix_web::dev::{Server, ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{App, HttpServer, web};
#[cfg(debug_assertions)]
use utoipa::OpenApi;
#[cfg(debug_assertions)]
use utoipa_swagger_ui::SwaggerUi;

#[cfg(debug_assertions)]
use crate::doc::ApiDoc;
use crate::domain::idempotency::IdempotencyGuard;
use crate::inbound::http::health::{HealthState, live, ready};
use crate::inbound::http::state::HttpState;
use crate::inbound::http::webhooks::receive_webhook;
use crate::middleware::{IdempotencyGuardMiddleware, Trace};

/// Registers host-application routes inside the guarded `/api/v1` scope.
pub type ApiRoutes = fn(&mut web::ServiceConfig);

/// Mount nothing under `/api/v1`.
pub fn no_api_routes(_: &mut web::ServiceConfig) {}

/// Per-worker application dependencies.
#[derive(Clone)]
pub struct AppDependencies {
    pub health_state: web::Data<HealthState>,
    pub http_state: web::Data<HttpState>,
    pub guard: Arc<IdempotencyGuard>,
    pub api_routes: ApiRoutes,
}

impl AppDependencies {
    /// Dependencies for `services` with no host routes.
    pub fn new(health_state: web::Data<HealthState>, services: &RelayServices) -> Self {
        Self {
            health_state,
            http_state: web::Data::new(HttpState::new(Arc::clone(&services.inbox))),
            guard: Arc::clone(&services.guard),
            api_routes: no_api_routes,
        }
    }

    /// Mount host routes under the guarded API scope.
    #[must_use]
    pub fn with_api_routes(mut self, api_routes: ApiRoutes) -> Self {
        self.api_routes = api_routes;
        self
    }
}

/// Assemble the Actix application.
pub fn build_app(
    deps: AppDependencies,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let AppDependencies {
        health_state,
        http_state,
        guard,
        api_routes,
    } = deps;

    let api = web::scope("/api/v1")
        .wrap(IdempotencyGuardMiddleware::new(guard))
        .configure(api_routes);

    let app = App::new()
        .app_data(health_state)
        .app_data(http_state)
        .wrap(Trace)
        .service(api)
        .service(receive_webhook)
        .service(ready)
        .service(live);

    #[cfg(debug_assertions)]
    let app = app.service(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));

    app
}

/// Construct an Actix HTTP server for the given services.
///
/// Readiness is flipped on once the listener is bound. Signals are left to
/// the caller, which stops the returned server's handle when draining.
///
/// # Errors
/// Propagates [`std::io::Error`] when binding the socket fails.
pub fn create_server(deps: AppDependencies, config: ServerConfig) -> std::io::Result<Server> {
    let health_state = deps.health_state.clone();
    let shutdown_grace_secs = config.shutdown_grace_secs();
    let ServerConfig {
        bind_addr,
        workers,
        #[cfg(feature = "metrics")]
        prometheus,
        ..
    } = config;

    #[cfg(feature = "metrics")]
    let metrics_layer = MetricsLayer::from_option(prometheus);

    let mut server = HttpServer::new(move || {
        let app = build_app(deps.clone());

        #[cfg(feature = "metrics")]
        let app = app.wrap(metrics_layer.clone());

        app
    })
    .shutdown_timeout(shutdown_grace_secs)
    .disable_signals();
    if let Some(workers) = workers {
        server = server.workers(workers.get());
    }
    let server = server.bind(bind_addr)?.run();

    health_state.mark_ready();
    Ok(server)
}

#[cfg(test)]
mod tests;
