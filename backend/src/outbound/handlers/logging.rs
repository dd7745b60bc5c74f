//! Handlers that only log what they would have done.
//!
//! Registered for outbox categories or webhook providers whose real
//! processing lives outside this service, typically in development wiring.

use async_trait::async_trait;
use tracing::info;

use crate::domain::inbox::WebhookInboxEvent;
use crate::domain::outbox::{EventCategory, OutboxEvent};
use crate::domain::ports::{
    OutboxHandler, OutboxHandlerError, WebhookEventHandler, WebhookHandlerError,
};

/// Handler that records a structured log line per event and succeeds.
#[derive(Debug, Clone, Copy)]
pub struct LoggingOutboxHandler {
    category: EventCategory,
}

impl LoggingOutboxHandler {
    /// Create a handler labelled with the category it stands in for.
    pub fn new(category: EventCategory) -> Self {
        Self { category }
    }
}

#[async_trait]
impl OutboxHandler for LoggingOutboxHandler {
    async fn handle(&self, event: &OutboxEvent) -> Result<(), OutboxHandlerError> {
        info!(
            category = %self.category,
            event_id = %event.id,
            tenant_id = %event.tenant_id,
            event_code = %event.event_code,
            attempts = event.attempts,
            "outbox event logged instead of delivered"
        );
        Ok(())
    }
}

/// Webhook handler that records a log line per event and succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingWebhookHandler;

#[async_trait]
impl WebhookEventHandler for LoggingWebhookHandler {
    async fn handle(&self, event: &WebhookInboxEvent) -> Result<(), WebhookHandlerError> {
        info!(
            provider = %event.provider,
            provider_event_id = %event.provider_event_id,
            event_type = %event.event_type,
            attempts = event.attempts,
            "webhook logged instead of applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TenantId;
    use crate::domain::outbox::{EventCode, OutboxStatus};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn always_succeeds() {
        let event = OutboxEvent {
            id: Uuid::new_v4(),
            tenant_id: TenantId::random(),
            event_code: EventCode::new("ANALYTICS_BOOKING_CREATED").expect("valid code"),
            payload: json!({"booking_id": 1}),
            status: OutboxStatus::Ready,
            ready_at: Utc::now(),
            delivered_at: None,
            failed_at: None,
            attempts: 0,
            max_attempts: 3,
            last_attempt_at: None,
            error_message: None,
            dedupe_key: None,
            metadata: json!({}),
            created_at: Utc::now(),
        };

        LoggingOutboxHandler::new(EventCategory::Analytics)
            .handle(&event)
            .await
            .expect("logging handler never fails");
    }

    #[tokio::test]
    async fn webhook_logging_always_succeeds() {
        let event = WebhookInboxEvent {
            id: Uuid::new_v4(),
            provider: crate::domain::inbox::ProviderName::new("stripe").expect("valid provider"),
            provider_event_id: "evt_1".to_owned(),
            event_type: "charge.refunded".to_owned(),
            payload: json!({"id": "evt_1"}),
            received_at: Utc::now(),
            processed_at: None,
            claimed_until: None,
            attempts: 0,
            last_error: None,
        };

        LoggingWebhookHandler
            .handle(&event)
            .await
            .expect("logging handler never fails");
    }
}
