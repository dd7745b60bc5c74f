//! Relay entry-point: migrates the database, starts the relay jobs, and
//! serves health probes, the webhook receiver and the guarded API scope.

use std::sync::Arc;

use actix_web::web;
use color_eyre::eyre::{WrapErr, eyre};
use mockable::DefaultClock;
use ortho_config::OrthoConfig;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use booking_relay::domain::idempotency::IdempotencyConfig;
use booking_relay::domain::inbox::{InboxConsumerConfig, ProviderName, WebhookHandlers};
use booking_relay::domain::outbox::{EventCategory, OutboxHandlers, OutboxPublisherConfig};
use booking_relay::domain::ports::IdempotencyMetrics;
use booking_relay::inbound::http::health::HealthState;
use booking_relay::inbound::jobs::{RelayJobs, RelayJobsConfig};
use booking_relay::outbound::handlers::{
    HttpWebhookHandler, LoggingOutboxHandler, LoggingWebhookHandler,
};
use booking_relay::outbound::persistence::{DbPool, PoolConfig, run_migrations};
use booking_relay::server::{
    AppDependencies, RelayRepositories, RelayServices, RelaySettings, RelayWiring, ServerConfig,
    create_server,
};

/// Application bootstrap.
#[actix_web::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings =
        RelaySettings::load().map_err(|err| eyre!("failed to load relay settings: {err}"))?;
    let database_url = settings
        .database_url()
        .ok_or_else(|| eyre!("RELAY_DATABASE_URL is required"))?
        .to_owned();
    let bind_addr = settings.bind_addr().wrap_err("invalid bind address")?;

    let applied = run_migrations(&database_url)
        .await
        .wrap_err("database migrations failed")?;
    info!(applied = applied.len(), "database migrations applied");

    let pool = DbPool::new(PoolConfig::new(&database_url).with_max_size(settings.pool_max_size()))
        .await
        .wrap_err("failed to build database pool")?;
    let status = pool.status();
    info!(
        connections = status.connections,
        idle = status.idle,
        "database pool ready"
    );

    #[cfg(feature = "metrics")]
    let prometheus = booking_relay::server::prometheus_metrics()
        .map_err(|err| eyre!("failed to configure Prometheus metrics: {err}"))?;
    #[cfg(feature = "metrics")]
    let idempotency_metrics: Arc<dyn IdempotencyMetrics> = Arc::new(
        booking_relay::outbound::metrics::PrometheusIdempotencyMetrics::new(&prometheus.registry)
            .wrap_err("failed to register idempotency metrics")?,
    );
    #[cfg(not(feature = "metrics"))]
    let idempotency_metrics: Arc<dyn IdempotencyMetrics> =
        Arc::new(booking_relay::domain::ports::NoOpIdempotencyMetrics);

    let services = RelayServices::build(RelayWiring {
        repositories: RelayRepositories::diesel(&pool),
        idempotency_metrics,
        outbox_handlers: outbox_handlers(&settings)?,
        webhook_handlers: webhook_handlers(&settings)?,
        clock: Arc::new(DefaultClock),
        idempotency: IdempotencyConfig::from_env(),
        publisher: publisher_config(&settings)?,
        inbox: InboxConsumerConfig::default(),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let jobs = RelayJobs::new(
        Arc::clone(&services.publisher),
        Arc::clone(&services.inbox),
        Arc::clone(&services.sweeper),
        RelayJobsConfig {
            outbox_interval: settings.outbox_interval(),
            inbox_interval: settings.inbox_interval(),
            sweep_interval: settings.sweep_interval(),
            ..RelayJobsConfig::default()
        },
    );
    let job_handles = jobs.spawn(&shutdown_rx);

    let health_state = web::Data::new(HealthState::new());
    let config = ServerConfig::new(bind_addr).with_shutdown_grace(settings.shutdown_grace());
    #[cfg(feature = "metrics")]
    let config = config.with_metrics(prometheus);
    let server = create_server(AppDependencies::new(health_state.clone(), &services), config)?;
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);
    info!(%bind_addr, "booking relay listening");

    shutdown_signal().await?;
    info!("shutdown requested; draining");
    health_state.mark_unhealthy();
    server_handle.stop(true).await;
    if shutdown_tx.send(true).is_err() {
        warn!("relay jobs already stopped");
    }
    for handle in job_handles {
        if let Err(err) = handle.await {
            warn!(error = %err, "relay job ended abnormally");
        }
    }
    server_task
        .await
        .wrap_err("HTTP server task failed")?
        .wrap_err("HTTP server failed")?;
    info!("booking relay stopped");
    Ok(())
}

fn outbox_handlers(settings: &RelaySettings) -> color_eyre::Result<OutboxHandlers> {
    let webhook = HttpWebhookHandler::new(settings.webhook_timeout())
        .wrap_err("failed to build webhook client")?;
    Ok(OutboxHandlers::new()
        .with_handler(EventCategory::Webhook, Arc::new(webhook))
        .with_handler(
            EventCategory::Notification,
            Arc::new(LoggingOutboxHandler::new(EventCategory::Notification)),
        )
        .with_handler(
            EventCategory::Analytics,
            Arc::new(LoggingOutboxHandler::new(EventCategory::Analytics)),
        ))
}

fn webhook_handlers(settings: &RelaySettings) -> color_eyre::Result<WebhookHandlers> {
    settings
        .webhook_providers()
        .into_iter()
        .try_fold(WebhookHandlers::new(), |handlers, name| {
            let provider = ProviderName::new(name.as_str())
                .map_err(|err| eyre!("invalid webhook provider {name:?}: {err}"))?;
            Ok(handlers.with_handler(provider, Arc::new(LoggingWebhookHandler)))
        })
}

fn publisher_config(settings: &RelaySettings) -> color_eyre::Result<OutboxPublisherConfig> {
    let mut config = OutboxPublisherConfig::new(settings.worker_id());
    config.batch_size = settings.outbox_batch_size();
    config.validate().wrap_err("invalid outbox publisher settings")?;
    Ok(config)
}

async fn shutdown_signal() -> color_eyre::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .wrap_err("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.wrap_err("failed to listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .wrap_err("failed to listen for ctrl-c")?;
    Ok(())
}
