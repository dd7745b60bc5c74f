//! Delivery capability invoked by the outbox publisher for one event family.
//!
//! Delivery is at-least-once: a crash between a successful `handle` and the
//! status commit redelivers the event, so implementations must tolerate
//! duplicates (e.g. by forwarding [`OutboxEvent::delivery_key`]).

use async_trait::async_trait;

use crate::domain::outbox::OutboxEvent;

use super::define_port_error;

define_port_error! {
    /// Errors a handler reports for a failed delivery attempt.
    pub enum OutboxHandlerError {
        /// The payload cannot be delivered in its current shape.
        InvalidPayload { message: String } => "outbox payload rejected: {message}",
        /// The downstream system could not be reached.
        Transport { message: String } => "outbox delivery transport failed: {message}",
        /// The downstream system answered with a failure.
        Rejected { message: String } => "outbox delivery rejected downstream: {message}",
    }
}

/// Side-effect capability for one [`crate::domain::outbox::EventCategory`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxHandler: Send + Sync {
    /// Deliver the event. `Ok` marks it delivered; `Err` schedules a retry.
    async fn handle(&self, event: &OutboxEvent) -> Result<(), OutboxHandlerError>;
}
