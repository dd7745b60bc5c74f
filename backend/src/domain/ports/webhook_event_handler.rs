//! Domain effect applied for an inbound provider webhook.

use async_trait::async_trait;

use crate::domain::inbox::WebhookInboxEvent;

use super::define_port_error;

define_port_error! {
    /// Errors a webhook handler reports.
    pub enum WebhookHandlerError {
        /// The event can never be applied as sent.
        Rejected { message: String } => "webhook event rejected: {message}",
        /// The effect could not be applied now; retry later.
        Transient { message: String } => "webhook event handling failed: {message}",
    }
}

/// Handler for one provider's events; dispatches on `event.event_type`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebhookEventHandler: Send + Sync {
    /// Apply the event's effect.
    async fn handle(&self, event: &WebhookInboxEvent) -> Result<(), WebhookHandlerError>;
}
