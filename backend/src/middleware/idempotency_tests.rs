//! Tests for the idempotency guard middleware.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use actix_web::{App, HttpResponse, test, web};
use rstest::rstest;
use serde_json::{Value, json};

use super::*;
use crate::domain::idempotency::IdempotencyConfig;
use crate::domain::ports::NoOpIdempotencyMetrics;
use crate::domain::{Error as DomainError, TenantId};
use crate::inbound::http::idempotency::{IDEMPOTENCY_KEY_HEADER, TENANT_ID_HEADER};
use crate::test_support::clock::MutableClock;
use crate::test_support::idempotency::InMemoryIdempotencyRepository;

const BOOKINGS: &str = "/api/v1/bookings";

struct Fixture {
    repo: Arc<InMemoryIdempotencyRepository>,
    guard: Arc<IdempotencyGuard>,
    calls: Arc<AtomicUsize>,
}

fn fixture() -> Fixture {
    let repo = Arc::new(InMemoryIdempotencyRepository::new());
    let guard = Arc::new(IdempotencyGuard::new(
        repo.clone(),
        Arc::new(NoOpIdempotencyMetrics),
        Arc::new(MutableClock::default()),
        IdempotencyConfig::default(),
    ));
    Fixture {
        repo,
        guard,
        calls: Arc::new(AtomicUsize::new(0)),
    }
}

async fn create_booking(calls: web::Data<AtomicUsize>, body: web::Json<Value>) -> HttpResponse {
    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
    if body.get("explode").is_some() {
        return HttpResponse::InternalServerError().json(json!({ "attempt": n }));
    }
    HttpResponse::Created()
        .insert_header(("Location", format!("/api/v1/bookings/{n}")))
        .insert_header(("Set-Cookie", "session=abc"))
        .json(json!({ "booking": n, "slot": body.get("slot") }))
}

macro_rules! service {
    ($fixture:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::from($fixture.calls.clone()))
                .wrap(IdempotencyGuardMiddleware::new($fixture.guard.clone()))
                .route(BOOKINGS, web::post().to(create_booking))
                .route(
                    "/api/v1/bookings",
                    web::get().to(|| async { HttpResponse::Ok().json(json!([])) }),
                ),
        )
        .await
    };
}

fn booking_request(tenant: TenantId, key: &str, body: &Value) -> test::TestRequest {
    test::TestRequest::post()
        .uri(BOOKINGS)
        .insert_header((TENANT_ID_HEADER, tenant.to_string()))
        .insert_header((IDEMPOTENCY_KEY_HEADER, key))
        .set_json(body)
}

#[actix_web::test]
async fn replays_stored_response_without_rerunning_handler() {
    let fixture = fixture();
    let app = service!(fixture);
    let tenant = TenantId::random();
    let body = json!({ "slot": "2026-03-02T10:00:00Z" });

    let first = test::call_service(&app, booking_request(tenant, "book-1", &body).to_request()).await;
    assert_eq!(first.status(), StatusCode::CREATED);
    assert!(first.headers().get(IDEMPOTENT_REPLAYED_HEADER).is_none());
    let first_body: Value = test::read_body_json(first).await;

    let second =
        test::call_service(&app, booking_request(tenant, "book-1", &body).to_request()).await;
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(
        second
            .headers()
            .get(IDEMPOTENT_REPLAYED_HEADER)
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );
    assert_eq!(
        second.headers().get("location").and_then(|v| v.to_str().ok()),
        Some("/api/v1/bookings/1")
    );
    assert!(second.headers().get("set-cookie").is_none());
    let second_body: Value = test::read_body_json(second).await;

    assert_eq!(first_body, second_body);
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.repo.completed_count(), 1);
}

#[actix_web::test]
async fn key_order_in_json_body_does_not_matter() {
    let fixture = fixture();
    let app = service!(fixture);
    let tenant = TenantId::random();

    let first = booking_request(tenant, "book-2", &json!({ "a": 1, "b": 2 })).to_request();
    test::call_service(&app, first).await;
    let reordered = test::TestRequest::post()
        .uri(BOOKINGS)
        .insert_header((TENANT_ID_HEADER, tenant.to_string()))
        .insert_header((IDEMPOTENCY_KEY_HEADER, "book-2"))
        .insert_header(("content-type", "application/json"))
        .set_payload(r#"{"b":2,"a":1}"#)
        .to_request();
    let res = test::call_service(&app, reordered).await;

    assert_eq!(res.status(), StatusCode::CREATED);
    assert!(res.headers().contains_key(IDEMPOTENT_REPLAYED_HEADER));
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn different_body_with_same_key_is_a_conflict() {
    let fixture = fixture();
    let app = service!(fixture);
    let tenant = TenantId::random();

    test::call_service(
        &app,
        booking_request(tenant, "book-3", &json!({ "slot": "a" })).to_request(),
    )
    .await;
    let res = test::call_service(
        &app,
        booking_request(tenant, "book-3", &json!({ "slot": "b" })).to_request(),
    )
    .await;

    assert_eq!(res.status(), StatusCode::CONFLICT);
    let error: DomainError = test::read_body_json(res).await;
    assert_eq!(
        error.reason(),
        Some(crate::domain::idempotency::KEY_REUSE_CODE)
    );
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn tenants_do_not_share_keys() {
    let fixture = fixture();
    let app = service!(fixture);
    let body = json!({ "slot": "a" });

    for tenant in [TenantId::random(), TenantId::random()] {
        let res =
            test::call_service(&app, booking_request(tenant, "shared", &body).to_request()).await;
        assert!(res.headers().get(IDEMPOTENT_REPLAYED_HEADER).is_none());
    }
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 2);
}

#[rstest]
#[case(true, false, "idempotency key required")]
#[case(false, true, "tenant id header required")]
#[actix_web::test]
async fn missing_headers_are_rejected_before_storage(
    #[case] with_tenant: bool,
    #[case] with_key: bool,
    #[case] message: &str,
) {
    let fixture = fixture();
    let app = service!(fixture);
    let mut req = test::TestRequest::post().uri(BOOKINGS).set_json(json!({}));
    if with_tenant {
        req = req.insert_header((TENANT_ID_HEADER, TenantId::random().to_string()));
    }
    if with_key {
        req = req.insert_header((IDEMPOTENCY_KEY_HEADER, "book-4"));
    }

    let res = test::call_service(&app, req.to_request()).await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let error: DomainError = test::read_body_json(res).await;
    assert_eq!(error.message(), message);
    assert!(fixture.repo.is_empty());
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn malformed_key_is_rejected() {
    let fixture = fixture();
    let app = service!(fixture);
    let req = booking_request(TenantId::random(), "not a key", &json!({})).to_request();

    let res = test::call_service(&app, req).await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let error: DomainError = test::read_body_json(res).await;
    assert_eq!(error.message(), "invalid idempotency key format");
}

#[actix_web::test]
async fn server_errors_release_the_key() {
    let fixture = fixture();
    let app = service!(fixture);
    let tenant = TenantId::random();
    let body = json!({ "explode": true });

    for expected_attempt in 1..=2 {
        let res =
            test::call_service(&app, booking_request(tenant, "book-5", &body).to_request()).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let payload: Value = test::read_body_json(res).await;
        assert_eq!(payload["attempt"], expected_attempt);
    }
    assert!(fixture.repo.is_empty());
}

#[actix_web::test]
async fn storage_outage_fails_closed() {
    let fixture = fixture();
    fixture.repo.fail_claims(true);
    let app = service!(fixture);

    let req = booking_request(TenantId::random(), "book-6", &json!({})).to_request();
    let res = test::call_service(&app, req).await;

    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn non_critical_routes_pass_through() {
    let fixture = fixture();
    let app = service!(fixture);

    let req = test::TestRequest::get().uri(BOOKINGS).to_request();
    let res = test::call_service(&app, req).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert!(fixture.repo.is_empty());
}
