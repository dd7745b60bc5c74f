//! Behaviour tests for idempotent replay of booking writes.
//!
//! The guard runs against the in-memory store with a stand-in booking
//! handler, so the scenarios can count how often business logic ran.

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Duration;

use booking_relay::domain::idempotency::{
    CachedResponse, CriticalEndpoint, GuardDecision, GuardRequest, IdempotencyConfig,
    IdempotencyGuard, IdempotencyKey, KEY_REUSE_CODE,
};
use booking_relay::domain::ports::NoOpIdempotencyMetrics;
use booking_relay::domain::{Error, ErrorCode, RetentionSweeper, TenantId};
use booking_relay::test_support::clock::{ImmediateSleeper, MutableClock};
use booking_relay::test_support::idempotency::InMemoryIdempotencyRepository;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::json;
use tokio::runtime::Runtime;

const BOOKINGS: &str = "/api/v1/bookings";

#[derive(Debug)]
enum Submission {
    Fresh(u16),
    Replayed(u16),
    Rejected(Error),
}

struct ReplayWorld {
    runtime: Runtime,
    tenant: TenantId,
    repo: Arc<InMemoryIdempotencyRepository>,
    clock: Arc<MutableClock>,
    guard: RefCell<Option<IdempotencyGuard>>,
    handler_status: Cell<u16>,
    handler_runs: Cell<usize>,
    last: RefCell<Option<Submission>>,
    swept: Cell<u64>,
}

impl ReplayWorld {
    fn new() -> Self {
        Self {
            runtime: Runtime::new().expect("create runtime"),
            tenant: TenantId::random(),
            repo: Arc::new(InMemoryIdempotencyRepository::new()),
            clock: Arc::new(MutableClock::default()),
            guard: RefCell::new(None),
            handler_status: Cell::new(201),
            handler_runs: Cell::new(0),
            last: RefCell::new(None),
            swept: Cell::new(0),
        }
    }

    fn submit(&self, room: u32, key: &str) -> Submission {
        let guard = self.guard.borrow();
        let guard = guard.as_ref().expect("guard configured");
        let body = json!({ "room": room, "nights": 2 }).to_string();
        let request = GuardRequest::new(
            self.tenant,
            IdempotencyKey::new(key).expect("valid key"),
            CriticalEndpoint::CreateBooking,
            "POST",
            BOOKINGS,
            body.as_bytes(),
        )
        .expect("request hashes");

        self.runtime.block_on(async {
            match guard.begin(&request).await {
                Err(err) => Submission::Rejected(err),
                Ok(GuardDecision::Replay(cached)) => Submission::Replayed(cached.status),
                Ok(GuardDecision::Proceed(ticket)) => {
                    self.handler_runs.set(self.handler_runs.get() + 1);
                    let status = self.handler_status.get();
                    let response = CachedResponse::new(
                        status,
                        br#"{"booking_id":"b-1"}"#.to_vec(),
                        [("location", "/api/v1/bookings/b-1")],
                    );
                    guard.finish(ticket, &response).await;
                    Submission::Fresh(status)
                }
            }
        })
    }
}

#[fixture]
fn world() -> ReplayWorld {
    ReplayWorld::new()
}

#[given("an idempotency guard for one tenant")]
fn an_idempotency_guard(world: &ReplayWorld) {
    let guard = IdempotencyGuard::new(
        world.repo.clone(),
        Arc::new(NoOpIdempotencyMetrics),
        world.clock.clone(),
        IdempotencyConfig::default(),
    )
    .with_sleeper(Arc::new(ImmediateSleeper));
    world.guard.replace(Some(guard));
}

#[given("the booking handler answers with status {status}")]
fn the_booking_handler_answers(world: &ReplayWorld, status: u16) {
    world.handler_status.set(status);
}

#[when("the booking handler answers with status {status}")]
fn the_booking_handler_now_answers(world: &ReplayWorld, status: u16) {
    world.handler_status.set(status);
}

#[when("a booking for room {room} is submitted with key {key}")]
fn a_booking_is_submitted(world: &ReplayWorld, room: u32, key: String) {
    let submission = world.submit(room, &key);
    world.last.replace(Some(submission));
}

#[when("{hours} hours pass and the retention sweeper runs")]
fn hours_pass_and_sweeper_runs(world: &ReplayWorld, hours: u64) {
    world.clock.advance(Duration::from_secs(hours * 3600));
    let sweeper = RetentionSweeper::new(world.repo.clone(), world.clock.clone());
    let deleted = world
        .runtime
        .block_on(sweeper.sweep())
        .expect("sweep should succeed");
    world.swept.set(deleted);
}

#[then("the booking handler ran {times} times")]
fn the_booking_handler_ran(world: &ReplayWorld, times: usize) {
    assert_eq!(world.handler_runs.get(), times);
}

#[then("the last submission was replayed with status {status}")]
fn the_last_submission_was_replayed(world: &ReplayWorld, status: u16) {
    match world.last.borrow().as_ref() {
        Some(Submission::Replayed(replayed)) => assert_eq!(*replayed, status),
        other => panic!("expected a replay, got {other:?}"),
    }
}

#[then("the last submission ran fresh with status {status}")]
fn the_last_submission_ran_fresh(world: &ReplayWorld, status: u16) {
    match world.last.borrow().as_ref() {
        Some(Submission::Fresh(fresh)) => assert_eq!(*fresh, status),
        other => panic!("expected a fresh run, got {other:?}"),
    }
}

#[then("the last submission was rejected as key reuse")]
fn the_last_submission_was_rejected(world: &ReplayWorld) {
    let last = world.last.borrow();
    let Some(Submission::Rejected(err)) = last.as_ref() else {
        panic!("expected a rejection, got {last:?}");
    };
    assert_eq!(err.code(), ErrorCode::Conflict);
    assert_eq!(err.reason(), Some(KEY_REUSE_CODE));
}

#[then("the sweeper deleted {count} keys")]
fn the_sweeper_deleted(world: &ReplayWorld, count: u64) {
    assert_eq!(world.swept.get(), count);
}

#[scenario(
    path = "tests/features/idempotent_replay.feature",
    name = "A retried booking replays the stored response"
)]
fn a_retried_booking_replays_the_stored_response(world: ReplayWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/idempotent_replay.feature",
    name = "Reusing a key with a different body is rejected"
)]
fn reusing_a_key_with_a_different_body_is_rejected(world: ReplayWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/idempotent_replay.feature",
    name = "A server error releases the key for a retry"
)]
fn a_server_error_releases_the_key_for_a_retry(world: ReplayWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/idempotent_replay.feature",
    name = "Swept keys no longer replay"
)]
fn swept_keys_no_longer_replay(world: ReplayWorld) {
    drop(world);
}
