//! Tests for webhook inbox validation and the exactly-once consumer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use mockable::Clock;
use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::domain::ErrorCode;
use crate::domain::ports::{
    InboxRepositoryError, MockInboxRepository, WebhookEventHandler, WebhookHandlerError,
};
use crate::test_support::clock::{MutableClock, fixed_now};
use crate::test_support::inbox::{InMemoryInboxRepository, RecordingWebhookHandler};

#[rstest]
#[case("stripe")]
#[case("twilio-sms")]
#[case("provider_2")]
fn provider_names_accept_slugs(#[case] name: &str) {
    assert_eq!(ProviderName::new(name).expect("valid").as_str(), name);
}

#[rstest]
#[case("", InboxValidationError::EmptyProvider)]
#[case("Stripe", InboxValidationError::InvalidProvider)]
#[case("stripe/v2", InboxValidationError::InvalidProvider)]
fn provider_names_reject_malformed(#[case] name: &str, #[case] expected: InboxValidationError) {
    assert_eq!(ProviderName::new(name).expect_err("invalid"), expected);
}

#[test]
fn provider_names_reject_overlong() {
    assert_eq!(
        ProviderName::new("p".repeat(65)).expect_err("too long"),
        InboxValidationError::InvalidProvider
    );
}

#[rstest]
#[case("", Err(InboxValidationError::EmptyEventId))]
#[case("   ", Err(InboxValidationError::EmptyEventId))]
#[case("evt_1", Ok(()))]
fn event_ids_must_not_be_blank(
    #[case] id: &str,
    #[case] expected: Result<(), InboxValidationError>,
) {
    assert_eq!(validate_provider_event_id(id), expected);
}

#[test]
fn event_ids_are_bounded() {
    assert_eq!(validate_provider_event_id(&"e".repeat(255)), Ok(()));
    assert_eq!(
        validate_provider_event_id(&"e".repeat(256)),
        Err(InboxValidationError::EventIdTooLong)
    );
}

#[test]
fn type_field_wins_over_event_type() {
    let payload = json!({"type": "charge.refunded", "event_type": "ignored"});
    assert_eq!(event_type_of(&payload), "charge.refunded");
    assert_eq!(event_type_of(&json!({"type": 7})), "unknown");
}

struct Harness {
    repo: Arc<InMemoryInboxRepository>,
    handler: Arc<RecordingWebhookHandler>,
    clock: Arc<MutableClock>,
    consumer: InboxConsumer,
}

fn stripe() -> ProviderName {
    ProviderName::new("stripe").expect("valid provider")
}

fn build(handler: RecordingWebhookHandler) -> Harness {
    let repo = Arc::new(InMemoryInboxRepository::new());
    let handler = Arc::new(handler);
    let clock = Arc::new(MutableClock::new(fixed_now()));
    let consumer = InboxConsumer::new(
        repo.clone(),
        WebhookHandlers::new().with_handler(stripe(), handler.clone()),
        clock.clone(),
        InboxConsumerConfig::default(),
    );
    Harness {
        repo,
        handler,
        clock,
        consumer,
    }
}

#[fixture]
fn harness() -> Harness {
    build(RecordingWebhookHandler::new())
}

fn succeeded(id: &str) -> serde_json::Value {
    json!({"id": id, "type": "payment_intent.succeeded", "data": {"amount": 1200}})
}

#[rstest]
#[tokio::test]
async fn redelivery_is_stored_once(harness: Harness) {
    let first = harness
        .consumer
        .receive(&stripe(), "evt_1", succeeded("evt_1"))
        .await
        .expect("first");
    let second = harness
        .consumer
        .receive(&stripe(), "evt_1", succeeded("evt_1"))
        .await
        .expect("redelivery");

    assert_eq!(first, ReceiveOutcome::Received);
    assert_eq!(second, ReceiveOutcome::Duplicate);
    let rows = harness.repo.all();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].event_type, "payment_intent.succeeded");
    assert_eq!(rows[0].received_at, fixed_now());
}

#[rstest]
#[tokio::test]
async fn same_event_id_from_other_provider_is_distinct(harness: Harness) {
    let twilio = ProviderName::new("twilio").expect("valid");
    harness
        .consumer
        .receive(&stripe(), "evt_1", succeeded("evt_1"))
        .await
        .expect("stripe");
    let outcome = harness
        .consumer
        .receive(&twilio, "evt_1", json!({"event_type": "sms.delivered"}))
        .await
        .expect("twilio");

    assert_eq!(outcome, ReceiveOutcome::Received);
    assert_eq!(harness.repo.all().len(), 2);
}

#[rstest]
#[tokio::test]
async fn blank_event_id_is_invalid(harness: Harness) {
    let err = harness
        .consumer
        .receive(&stripe(), " ", json!({}))
        .await
        .expect_err("rejected");
    assert_eq!(err.code(), ErrorCode::InvalidRequest);
    assert!(harness.repo.all().is_empty());
}

#[rstest]
#[tokio::test]
async fn processing_applies_effect_exactly_once(harness: Harness) {
    harness
        .consumer
        .receive(&stripe(), "evt_1", succeeded("evt_1"))
        .await
        .expect("receive");
    harness
        .consumer
        .receive(&stripe(), "evt_1", succeeded("evt_1"))
        .await
        .expect("redelivery");

    let first = harness
        .consumer
        .process_webhook_event(&stripe(), "evt_1")
        .await
        .expect("process");
    let second = harness
        .consumer
        .process_webhook_event(&stripe(), "evt_1")
        .await
        .expect("reprocess");

    assert_eq!(first, ProcessOutcome::Processed);
    assert_eq!(second, ProcessOutcome::AlreadyProcessed);
    assert_eq!(
        harness.handler.applied(),
        vec![("evt_1".to_owned(), "payment_intent.succeeded".to_owned())]
    );
    assert_eq!(harness.repo.all()[0].processed_at, Some(fixed_now()));
}

#[rstest]
#[tokio::test]
async fn unknown_event_is_not_found(harness: Harness) {
    let err = harness
        .consumer
        .process_webhook_event(&stripe(), "evt_missing")
        .await
        .expect_err("missing");
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn handler_failure_leaves_event_retryable() {
    let harness = build(RecordingWebhookHandler::failing("ledger busy", 1));
    harness
        .consumer
        .receive(&stripe(), "evt_2", succeeded("evt_2"))
        .await
        .expect("receive");

    let err = harness
        .consumer
        .process_webhook_event(&stripe(), "evt_2")
        .await
        .expect_err("handler fails");
    assert_eq!(err.code(), ErrorCode::InternalError);
    let row = harness.repo.all().remove(0);
    assert_eq!(row.processed_at, None);
    assert_eq!(row.attempts, 1);
    assert_eq!(
        row.last_error.as_deref(),
        Some("webhook event handling failed: ledger busy")
    );
    assert_eq!(row.claimed_until, None);

    let retried = harness
        .consumer
        .process_webhook_event(&stripe(), "evt_2")
        .await
        .expect("retry succeeds");
    assert_eq!(retried, ProcessOutcome::Processed);
    assert_eq!(harness.handler.applied().len(), 1);
}

#[rstest]
#[tokio::test]
async fn held_event_is_a_conflict_until_lease_lapses(harness: Harness) {
    harness
        .consumer
        .receive(&stripe(), "evt_3", succeeded("evt_3"))
        .await
        .expect("receive");
    let id = harness.repo.all()[0].id;
    harness
        .repo
        .hold(id, harness.clock.utc() + TimeDelta::seconds(30));

    let err = harness
        .consumer
        .process_webhook_event(&stripe(), "evt_3")
        .await
        .expect_err("held elsewhere");
    assert_eq!(err.code(), ErrorCode::Conflict);
    assert!(harness.handler.applied().is_empty());

    harness.clock.advance(Duration::from_secs(30));
    let outcome = harness
        .consumer
        .process_webhook_event(&stripe(), "evt_3")
        .await
        .expect("lease lapsed");
    assert_eq!(outcome, ProcessOutcome::Processed);
}

#[tokio::test]
async fn missing_handler_leaves_row_untouched() {
    let repo = Arc::new(InMemoryInboxRepository::new());
    let consumer = InboxConsumer::new(
        repo.clone(),
        WebhookHandlers::new(),
        Arc::new(MutableClock::default()),
        InboxConsumerConfig::default(),
    );
    consumer
        .receive(&stripe(), "evt_4", succeeded("evt_4"))
        .await
        .expect("receive");

    let err = consumer
        .process_webhook_event(&stripe(), "evt_4")
        .await
        .expect_err("no handler");

    assert_eq!(err.code(), ErrorCode::InternalError);
    let row = repo.all().remove(0);
    assert_eq!(row.attempts, 0);
    assert_eq!(row.claimed_until, None);
}

/// Handler that takes long enough for a concurrent consumer to race it.
struct SlowHandler(Arc<RecordingWebhookHandler>);

#[async_trait]
impl WebhookEventHandler for SlowHandler {
    async fn handle(
        &self,
        event: &WebhookInboxEvent,
    ) -> Result<(), WebhookHandlerError> {
        tokio::task::yield_now().await;
        self.0.handle(event).await
    }
}

#[tokio::test]
async fn concurrent_consumers_apply_once() {
    let repo = Arc::new(InMemoryInboxRepository::new());
    let recorder = Arc::new(RecordingWebhookHandler::new());
    let consumer = InboxConsumer::new(
        repo.clone(),
        WebhookHandlers::new().with_handler(stripe(), Arc::new(SlowHandler(recorder.clone()))),
        Arc::new(MutableClock::default()),
        InboxConsumerConfig::default(),
    );
    consumer
        .receive(&stripe(), "evt_5", succeeded("evt_5"))
        .await
        .expect("receive");

    let provider = stripe();
    let (a, b) = tokio::join!(
        consumer.process_webhook_event(&provider, "evt_5"),
        consumer.process_webhook_event(&provider, "evt_5"),
    );

    let processed = [&a, &b]
        .iter()
        .filter(|result| matches!(result, Ok(ProcessOutcome::Processed)))
        .count();
    assert_eq!(processed, 1);
    assert_eq!(recorder.applied().len(), 1);
}

#[tokio::test]
async fn pending_sweep_processes_backlog_in_arrival_order() {
    let harness = build(RecordingWebhookHandler::failing("transient", 1));
    for id in ["evt_a", "evt_b", "evt_c"] {
        harness
            .consumer
            .receive(&stripe(), id, succeeded(id))
            .await
            .expect("receive");
        harness.clock.advance(Duration::from_secs(1));
    }

    let first = harness.consumer.process_pending(10).await.expect("sweep");
    assert_eq!(
        first,
        PendingReport {
            processed: 2,
            skipped: 0,
            failed: 1
        }
    );

    let second = harness.consumer.process_pending(10).await.expect("sweep");
    assert_eq!(second.processed, 1);
    let applied: Vec<_> = harness
        .handler
        .applied()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(applied, vec!["evt_b", "evt_c", "evt_a"]);
}

#[tokio::test]
async fn store_outage_is_service_unavailable() {
    let mut repo = MockInboxRepository::new();
    repo.expect_insert()
        .returning(|_| Err(InboxRepositoryError::connection("refused")));
    let consumer = InboxConsumer::new(
        Arc::new(repo),
        WebhookHandlers::new(),
        Arc::new(MutableClock::default()),
        InboxConsumerConfig::default(),
    );

    let err = consumer
        .receive(&stripe(), "evt_6", json!({}))
        .await
        .expect_err("outage");
    assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
}
