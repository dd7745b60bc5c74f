//! Webhook inbox: inbound provider callbacks stored on receipt and applied
//! exactly once, keyed by (provider, provider event id).

mod consumer;
mod event;

pub use consumer::{InboxConsumer, InboxConsumerConfig, WebhookHandlers};
pub use event::{
    InboxValidationError, NewWebhookInboxEvent, PendingReport, ProcessOutcome, ProviderName,
    ReceiveOutcome, WebhookInboxEvent, event_type_of, validate_provider_event_id,
};

#[cfg(test)]
mod tests;
