//! Builders wiring repositories and handlers into the relay services.

use std::sync::Arc;

use mockable::Clock;

use crate::domain::RetentionSweeper;
use crate::domain::idempotency::{IdempotencyConfig, IdempotencyGuard};
use crate::domain::inbox::{InboxConsumer, InboxConsumerConfig, WebhookHandlers};
use crate::domain::outbox::{OutboxHandlers, OutboxPublisher, OutboxPublisherConfig};
use crate::domain::ports::{
    IdempotencyMetrics, IdempotencyRepository, InboxRepository, OutboxRepository,
};
use crate::outbound::persistence::{
    DbPool, DieselIdempotencyRepository, DieselInboxRepository, DieselOutboxRepository,
};

/// The three storage ports the relay depends on.
#[derive(Clone)]
pub struct RelayRepositories {
    pub idempotency: Arc<dyn IdempotencyRepository>,
    pub outbox: Arc<dyn OutboxRepository>,
    pub inbox: Arc<dyn InboxRepository>,
}

impl RelayRepositories {
    /// PostgreSQL-backed repositories sharing one pool.
    pub fn diesel(pool: &DbPool) -> Self {
        Self {
            idempotency: Arc::new(DieselIdempotencyRepository::new(pool.clone())),
            outbox: Arc::new(DieselOutboxRepository::new(pool.clone())),
            inbox: Arc::new(DieselInboxRepository::new(pool.clone())),
        }
    }
}

/// Everything needed to build [`RelayServices`].
pub struct RelayWiring {
    pub repositories: RelayRepositories,
    pub idempotency_metrics: Arc<dyn IdempotencyMetrics>,
    pub outbox_handlers: OutboxHandlers,
    pub webhook_handlers: WebhookHandlers,
    pub clock: Arc<dyn Clock>,
    pub idempotency: IdempotencyConfig,
    pub publisher: OutboxPublisherConfig,
    pub inbox: InboxConsumerConfig,
}

/// The four relay services, shared between HTTP workers and job loops.
#[derive(Clone)]
pub struct RelayServices {
    pub guard: Arc<IdempotencyGuard>,
    pub publisher: Arc<OutboxPublisher>,
    pub inbox: Arc<InboxConsumer>,
    pub sweeper: Arc<RetentionSweeper>,
}

impl RelayServices {
    pub fn build(wiring: RelayWiring) -> Self {
        let RelayWiring {
            repositories,
            idempotency_metrics,
            outbox_handlers,
            webhook_handlers,
            clock,
            idempotency,
            publisher,
            inbox,
        } = wiring;

        Self {
            guard: Arc::new(IdempotencyGuard::new(
                Arc::clone(&repositories.idempotency),
                idempotency_metrics,
                Arc::clone(&clock),
                idempotency,
            )),
            publisher: Arc::new(OutboxPublisher::new(
                repositories.outbox,
                outbox_handlers,
                Arc::clone(&clock),
                publisher,
            )),
            inbox: Arc::new(InboxConsumer::new(
                repositories.inbox,
                webhook_handlers,
                Arc::clone(&clock),
                inbox,
            )),
            sweeper: Arc::new(RetentionSweeper::new(repositories.idempotency, clock)),
        }
    }
}
