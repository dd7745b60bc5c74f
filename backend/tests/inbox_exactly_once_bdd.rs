//! Behaviour tests for exactly-once webhook processing.
//!
//! Each delivery is stored and then processed the way the webhook receiver
//! does it, so redeliveries and the pending sweep can be observed end to end.

use std::cell::RefCell;
use std::sync::Arc;

use booking_relay::domain::inbox::{
    InboxConsumer, InboxConsumerConfig, ProviderName, ReceiveOutcome, WebhookHandlers,
};
use booking_relay::test_support::clock::MutableClock;
use booking_relay::test_support::inbox::{InMemoryInboxRepository, RecordingWebhookHandler};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::json;
use tokio::runtime::Runtime;

const SWEEP_LIMIT: u32 = 100;

struct InboxWorld {
    runtime: Runtime,
    repo: Arc<InMemoryInboxRepository>,
    handler: RefCell<Option<Arc<RecordingWebhookHandler>>>,
    consumer: RefCell<Option<InboxConsumer>>,
    last_receipt: RefCell<Option<ReceiveOutcome>>,
}

impl InboxWorld {
    fn new() -> Self {
        Self {
            runtime: Runtime::new().expect("create runtime"),
            repo: Arc::new(InMemoryInboxRepository::new()),
            handler: RefCell::new(None),
            consumer: RefCell::new(None),
            last_receipt: RefCell::new(None),
        }
    }

    fn install(&self, provider: &str, handler: RecordingWebhookHandler) {
        let handler = Arc::new(handler);
        let handlers = WebhookHandlers::new().with_handler(provider_name(provider), handler.clone());
        let consumer = InboxConsumer::new(
            self.repo.clone(),
            handlers,
            Arc::new(MutableClock::default()),
            InboxConsumerConfig::default(),
        );
        self.handler.replace(Some(handler));
        self.consumer.replace(Some(consumer));
    }

    fn applied_count(&self, event_id: &str) -> usize {
        let handler = self.handler.borrow();
        handler
            .as_ref()
            .expect("handler installed")
            .applied()
            .iter()
            .filter(|(id, _)| id == event_id)
            .count()
    }
}

fn provider_name(name: &str) -> ProviderName {
    ProviderName::new(name).expect("valid provider")
}

#[fixture]
fn world() -> InboxWorld {
    InboxWorld::new()
}

#[given("an inbox consumer for provider {provider}")]
fn an_inbox_consumer(world: &InboxWorld, provider: String) {
    world.install(&provider, RecordingWebhookHandler::new());
}

#[given("a flaky inbox consumer for provider {provider}")]
fn a_flaky_inbox_consumer(world: &InboxWorld, provider: String) {
    world.install(&provider, RecordingWebhookHandler::failing("ledger locked", 1));
}

#[when("{provider} delivers event {event_id}")]
fn provider_delivers_event(world: &InboxWorld, provider: String, event_id: String) {
    let consumer = world.consumer.borrow();
    let consumer = consumer.as_ref().expect("consumer installed");
    let provider = provider_name(&provider);
    let payload = json!({ "id": event_id, "type": "payment_intent.succeeded" });
    let receipt = world
        .runtime
        .block_on(consumer.receive(&provider, &event_id, payload))
        .expect("receive should succeed");
    world.last_receipt.replace(Some(receipt));
    // Processing errors leave the row for the pending sweep.
    let _ = world
        .runtime
        .block_on(consumer.process_webhook_event(&provider, &event_id));
}

#[when("the pending sweep runs")]
fn the_pending_sweep_runs(world: &InboxWorld) {
    let consumer = world.consumer.borrow();
    world
        .runtime
        .block_on(
            consumer
                .as_ref()
                .expect("consumer installed")
                .process_pending(SWEEP_LIMIT),
        )
        .expect("sweep should succeed");
}

#[then("the last delivery was {outcome}")]
fn the_last_delivery_was(world: &InboxWorld, outcome: String) {
    let receipt = world.last_receipt.borrow().expect("a delivery happened");
    assert_eq!(receipt.as_str(), outcome);
}

#[then("event {event_id} was applied {times} times")]
fn event_was_applied(world: &InboxWorld, event_id: String, times: usize) {
    assert_eq!(world.applied_count(&event_id), times);
}

#[then("event {event_id} is processed")]
fn event_is_processed(world: &InboxWorld, event_id: String) {
    let row = stored(world, &event_id);
    assert!(row.is_processed());
    assert_eq!(row.attempts, 1, "the failed attempt stays on record");
}

#[then("event {event_id} is unprocessed")]
fn event_is_unprocessed(world: &InboxWorld, event_id: String) {
    let row = stored(world, &event_id);
    assert!(!row.is_processed());
    assert_eq!(world.applied_count(&event_id), 0);
}

fn stored(
    world: &InboxWorld,
    event_id: &str,
) -> booking_relay::domain::inbox::WebhookInboxEvent {
    world
        .repo
        .all()
        .into_iter()
        .find(|row| row.provider_event_id == event_id)
        .expect("event stored")
}

#[scenario(
    path = "tests/features/inbox_exactly_once.feature",
    name = "A redelivered webhook is applied once"
)]
fn a_redelivered_webhook_is_applied_once(world: InboxWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/inbox_exactly_once.feature",
    name = "A failed webhook is picked up by the pending sweep"
)]
fn a_failed_webhook_is_picked_up_by_the_pending_sweep(world: InboxWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/inbox_exactly_once.feature",
    name = "Webhooks from providers without a handler stay unprocessed"
)]
fn webhooks_from_providers_without_a_handler_stay_unprocessed(world: InboxWorld) {
    drop(world);
}
