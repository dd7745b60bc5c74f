//! Exactly-once application of inbound provider webhooks.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use mockable::Clock;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    InboxValidationError, NewWebhookInboxEvent, PendingReport, ProcessOutcome, ProviderName,
    ReceiveOutcome, WebhookInboxEvent,
};
use crate::domain::Error;
use crate::domain::ports::{InboxRepository, WebhookEventHandler};
use crate::domain::runtime::instant_after;

/// Handlers keyed by provider.
#[derive(Clone, Default)]
pub struct WebhookHandlers {
    by_provider: HashMap<ProviderName, Arc<dyn WebhookEventHandler>>,
}

impl WebhookHandlers {
    /// Start with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `provider`, replacing any previous one.
    #[must_use]
    pub fn with_handler(
        mut self,
        provider: ProviderName,
        handler: Arc<dyn WebhookEventHandler>,
    ) -> Self {
        self.by_provider.insert(provider, handler);
        self
    }

    /// Handler for `provider`, if registered.
    pub fn for_provider(&self, provider: &ProviderName) -> Option<&Arc<dyn WebhookEventHandler>> {
        self.by_provider.get(provider)
    }
}

impl std::fmt::Debug for WebhookHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<_> = self.by_provider.keys().map(ProviderName::as_str).collect();
        providers.sort_unstable();
        f.debug_struct("WebhookHandlers")
            .field("providers", &providers)
            .finish()
    }
}

/// Consumer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboxConsumerConfig {
    /// How long one consumer holds a row while its handler runs.
    pub claim_lease: Duration,
    /// Upper bound on a single handler call.
    pub handler_timeout: Duration,
}

impl Default for InboxConsumerConfig {
    fn default() -> Self {
        Self {
            claim_lease: Duration::from_secs(60),
            handler_timeout: Duration::from_secs(30),
        }
    }
}

/// Inbox consumer service.
pub struct InboxConsumer {
    repository: Arc<dyn InboxRepository>,
    handlers: WebhookHandlers,
    clock: Arc<dyn Clock>,
    config: InboxConsumerConfig,
}

impl InboxConsumer {
    /// Create a consumer.
    pub fn new(
        repository: Arc<dyn InboxRepository>,
        handlers: WebhookHandlers,
        clock: Arc<dyn Clock>,
        config: InboxConsumerConfig,
    ) -> Self {
        Self {
            repository,
            handlers,
            clock,
            config,
        }
    }

    /// Store a webhook on receipt, before acknowledging the provider.
    pub async fn receive(
        &self,
        provider: &ProviderName,
        provider_event_id: &str,
        payload: Value,
    ) -> Result<ReceiveOutcome, Error> {
        let event = NewWebhookInboxEvent::from_payload(
            provider.clone(),
            provider_event_id,
            payload,
            self.clock.utc(),
        )
        .map_err(map_validation_error)?;
        let inserted = self
            .repository
            .insert(&event)
            .await
            .map_err(Error::from)?;
        let outcome = if inserted {
            ReceiveOutcome::Received
        } else {
            ReceiveOutcome::Duplicate
        };
        debug!(
            %provider,
            provider_event_id,
            event_type = %event.event_type,
            outcome = outcome.as_str(),
            "webhook stored"
        );
        Ok(outcome)
    }

    /// Apply a stored webhook's effect at most once.
    ///
    /// # Errors
    ///
    /// - `not_found` when no row exists.
    /// - `conflict` when another consumer currently holds the row.
    /// - `internal_error` when no handler is registered or the handler fails;
    ///   the row stays unprocessed for a later retry.
    pub async fn process_webhook_event(
        &self,
        provider: &ProviderName,
        provider_event_id: &str,
    ) -> Result<ProcessOutcome, Error> {
        let Some(event) = self.load(provider, provider_event_id).await? else {
            return Err(Error::not_found(format!(
                "webhook event {provider}/{provider_event_id} not found"
            )));
        };
        self.process(event).await
    }

    /// Process up to `limit` unprocessed rows, oldest first.
    pub async fn process_pending(&self, limit: u32) -> Result<PendingReport, Error> {
        let events = self
            .repository
            .list_unprocessed(self.clock.utc(), limit)
            .await
            .map_err(Error::from)?;
        let mut report = PendingReport::default();
        for event in events {
            let id = event.id;
            match self.process(event).await {
                Ok(ProcessOutcome::Processed) => report.processed += 1,
                Ok(ProcessOutcome::AlreadyProcessed) => report.skipped += 1,
                Err(err) if err.code() == crate::domain::ErrorCode::Conflict => report.skipped += 1,
                Err(err) => {
                    warn!(event_id = %id, error = %err, "pending webhook processing failed");
                    report.failed += 1;
                }
            }
        }
        if report != PendingReport::default() {
            info!(
                processed = report.processed,
                skipped = report.skipped,
                failed = report.failed,
                "pending webhooks swept"
            );
        }
        Ok(report)
    }

    async fn process(&self, event: WebhookInboxEvent) -> Result<ProcessOutcome, Error> {
        if event.is_processed() {
            return Ok(ProcessOutcome::AlreadyProcessed);
        }
        let Some(handler) = self.handlers.for_provider(&event.provider) else {
            warn!(provider = %event.provider, "no webhook handler registered");
            return Err(Error::internal(format!(
                "no webhook handler registered for provider {}",
                event.provider
            )));
        };

        let now = self.clock.utc();
        let claimed = self
            .repository
            .try_claim(event.id, now, instant_after(now, self.config.claim_lease))
            .await
            .map_err(Error::from)?;
        if !claimed {
            return match self.load(&event.provider, &event.provider_event_id).await? {
                Some(current) if current.is_processed() => Ok(ProcessOutcome::AlreadyProcessed),
                _ => Err(Error::conflict("webhook event is being processed")),
            };
        }

        let call = AssertUnwindSafe(handler.handle(&event)).catch_unwind();
        let failure = match tokio::time::timeout(self.config.handler_timeout, call).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(err))) => Some(err.to_string()),
            Ok(Err(_)) => Some("webhook handler panicked".to_owned()),
            Err(_) => Some(format!(
                "webhook handler timed out after {}ms",
                self.config.handler_timeout.as_millis()
            )),
        };

        if let Some(message) = failure {
            warn!(
                provider = %event.provider,
                provider_event_id = %event.provider_event_id,
                event_type = %event.event_type,
                error = %message,
                "webhook handler failed"
            );
            self.repository
                .record_failure(event.id, &message)
                .await
                .map_err(Error::from)?;
            return Err(Error::internal(format!("webhook handler failed: {message}")));
        }

        let marked = self
            .repository
            .mark_processed(event.id, self.clock.utc())
            .await
            .map_err(Error::from)?;
        if !marked {
            return Ok(ProcessOutcome::AlreadyProcessed);
        }
        info!(
            provider = %event.provider,
            provider_event_id = %event.provider_event_id,
            event_type = %event.event_type,
            "webhook processed"
        );
        Ok(ProcessOutcome::Processed)
    }

    async fn load(
        &self,
        provider: &ProviderName,
        provider_event_id: &str,
    ) -> Result<Option<WebhookInboxEvent>, Error> {
        self.repository
            .find(provider, provider_event_id)
            .await
            .map_err(Error::from)
    }
}

fn map_validation_error(error: InboxValidationError) -> Error {
    Error::invalid_request(error.to_string())
}

