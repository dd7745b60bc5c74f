//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod idempotency_metrics;
mod idempotency_repository;
mod inbox_repository;
mod outbox_handler;
mod outbox_repository;
mod webhook_event_handler;

pub use idempotency_metrics::{
    ConflictKind, GuardOutcome, IdempotencyMetricLabels, IdempotencyMetrics,
    IdempotencyMetricsError, NoOpIdempotencyMetrics,
};
#[cfg(test)]
pub use idempotency_metrics::MockIdempotencyMetrics;
#[cfg(test)]
pub use idempotency_repository::MockIdempotencyRepository;
pub use idempotency_repository::{
    IdempotencyRepository, IdempotencyRepositoryError,
};
#[cfg(test)]
pub use inbox_repository::MockInboxRepository;
pub use inbox_repository::{InboxRepository, InboxRepositoryError};
#[cfg(test)]
pub use outbox_handler::MockOutboxHandler;
pub use outbox_handler::{OutboxHandler, OutboxHandlerError};
#[cfg(test)]
pub use outbox_repository::MockOutboxRepository;
pub use outbox_repository::{OutboxRepository, OutboxRepositoryError};
#[cfg(test)]
pub use webhook_event_handler::MockWebhookEventHandler;
pub use webhook_event_handler::{WebhookEventHandler, WebhookHandlerError};
