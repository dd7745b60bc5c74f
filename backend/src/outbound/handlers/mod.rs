//! Outbox handler adapters.

mod http_webhook;
mod logging;

pub use http_webhook::HttpWebhookHandler;
pub use logging::{LoggingOutboxHandler, LoggingWebhookHandler};
