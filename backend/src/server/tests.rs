//! Application assembly tests against in-memory adapters.

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, test, web};
use serde_json::{Value, json};

use super::*;
use crate::domain::TenantId;
use crate::domain::idempotency::IdempotencyConfig;
use crate::domain::inbox::{InboxConsumerConfig, WebhookHandlers};
use crate::domain::outbox::{OutboxHandlers, OutboxPublisherConfig};
use crate::domain::ports::NoOpIdempotencyMetrics;
use crate::inbound::http::idempotency::{
    IDEMPOTENCY_KEY_HEADER, IDEMPOTENT_REPLAYED_HEADER, TENANT_ID_HEADER,
};
use crate::test_support::clock::MutableClock;
use crate::test_support::idempotency::InMemoryIdempotencyRepository;
use crate::test_support::inbox::InMemoryInboxRepository;
use crate::test_support::outbox::InMemoryOutboxRepository;

fn services() -> RelayServices {
    RelayServices::build(RelayWiring {
        repositories: RelayRepositories {
            idempotency: Arc::new(InMemoryIdempotencyRepository::new()),
            outbox: Arc::new(InMemoryOutboxRepository::new()),
            inbox: Arc::new(InMemoryInboxRepository::new()),
        },
        idempotency_metrics: Arc::new(NoOpIdempotencyMetrics),
        outbox_handlers: OutboxHandlers::new(),
        webhook_handlers: WebhookHandlers::new(),
        clock: Arc::new(MutableClock::default()),
        idempotency: IdempotencyConfig::default(),
        publisher: OutboxPublisherConfig::new("relay-test"),
        inbox: InboxConsumerConfig::default(),
    })
}

fn refund_routes(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/payments/refunds",
        web::post().to(|body: web::Json<Value>| async move {
            HttpResponse::Created().json(json!({ "refund": body.get("amount") }))
        }),
    );
}

fn deps() -> AppDependencies {
    let health = web::Data::new(HealthState::new());
    health.mark_ready();
    AppDependencies::new(health, &services()).with_api_routes(refund_routes)
}

#[actix_web::test]
async fn probes_and_trace_header_are_mounted() {
    let app = test::init_service(build_app(deps())).await;

    let res = test::call_service(
        &app,
        test::TestRequest::get().uri("/health/ready").to_request(),
    )
    .await;

    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key(crate::domain::TRACE_ID_HEADER));
}

#[actix_web::test]
async fn host_routes_sit_behind_the_guard() {
    let app = test::init_service(build_app(deps())).await;
    let tenant = TenantId::random();
    let request = || {
        test::TestRequest::post()
            .uri("/api/v1/payments/refunds")
            .insert_header((TENANT_ID_HEADER, tenant.to_string()))
            .insert_header((IDEMPOTENCY_KEY_HEADER, "refund-1"))
            .set_json(json!({ "amount": 1200 }))
            .to_request()
    };

    let first = test::call_service(&app, request()).await;
    let second = test::call_service(&app, request()).await;

    assert_eq!(first.status(), StatusCode::CREATED);
    assert!(first.headers().get(IDEMPOTENT_REPLAYED_HEADER).is_none());
    assert_eq!(second.status(), StatusCode::CREATED);
    assert!(second.headers().contains_key(IDEMPOTENT_REPLAYED_HEADER));
}

#[actix_web::test]
async fn guarded_route_without_key_is_rejected() {
    let app = test::init_service(build_app(deps())).await;

    let res = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/payments/refunds")
            .insert_header((TENANT_ID_HEADER, TenantId::random().to_string()))
            .set_json(json!({ "amount": 1 }))
            .to_request(),
    )
    .await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn webhook_receiver_is_mounted() {
    let app = test::init_service(build_app(deps())).await;

    let res = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/webhooks/stripe")
            .insert_header(("content-type", "application/json"))
            .set_payload(json!({ "id": "evt_1" }).to_string())
            .to_request(),
    )
    .await;

    assert_eq!(res.status(), StatusCode::ACCEPTED);
}
