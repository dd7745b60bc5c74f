//! Transactional outbox: emitted domain events and the publisher that
//! delivers them.
//!
//! `ready -> delivered` on success, `ready -> ready` with a later `ready_at`
//! on a retryable failure, `ready -> failed` once the budget is spent, and
//! `ready -> dead_lettered` when no handler can serve the code. Terminal
//! states change only through an explicit replay.

mod event;
mod handlers;
mod publisher;
mod retry;

pub use event::{
    AttemptResolution, EmitOutcome, EventCategory, EventCode, EventCodeValidationError,
    NewOutboxEvent, OutboxEvent, OutboxStatus, ParseOutboxStatusError,
};
pub use handlers::OutboxHandlers;
pub use publisher::{BatchReport, OutboxConfigError, OutboxPublisher, OutboxPublisherConfig};
pub use retry::RetryPolicy;
