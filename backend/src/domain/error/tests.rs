//! Tests for domain error construction and serialisation.

use super::*;
use rstest::{fixture, rstest};
use serde_json::json;

const TRACE_ID: &str = "00000000-0000-0000-0000-000000000000";

#[fixture]
fn base_error() -> Error {
    Error::invalid_request("bad")
}

#[rstest]
#[case(Error::invalid_request("bad"), ErrorCode::InvalidRequest)]
#[case(Error::not_found("missing"), ErrorCode::NotFound)]
#[case(Error::conflict("taken"), ErrorCode::Conflict)]
#[case(Error::service_unavailable("db down"), ErrorCode::ServiceUnavailable)]
#[case(Error::internal("boom"), ErrorCode::InternalError)]
fn constructors_set_codes(#[case] error: Error, #[case] expected: ErrorCode) {
    assert_eq!(error.code(), expected);
}

#[rstest]
fn try_new_rejects_empty_messages() {
    let result = Error::try_new(ErrorCode::InvalidRequest, "   ");
    assert!(matches!(result, Err(ErrorValidationError::EmptyMessage)));
}

#[rstest]
fn try_with_trace_id_rejects_empty_values(base_error: Error) {
    let result = base_error.try_with_trace_id("   ");
    assert!(matches!(result, Err(ErrorValidationError::EmptyTraceId)));
}

#[rstest]
fn new_returns_none_when_trace_id_out_of_scope() {
    let error = Error::internal("boom");
    assert!(error.trace_id().is_none());
}

#[rstest]
#[tokio::test]
async fn new_captures_trace_id_in_scope() {
    let trace_id: TraceId = TRACE_ID.parse().expect("fixture is a valid UUID");
    let error = TraceId::scope(trace_id, async move { Error::conflict("taken") }).await;

    assert_eq!(error.trace_id(), Some(TRACE_ID));
}

#[rstest]
#[tokio::test]
async fn deserialising_ignores_ambient_trace() {
    let trace_id: TraceId = TRACE_ID.parse().expect("fixture is a valid UUID");
    let payload = json!({"code": "not_found", "message": "gone"});

    let error = TraceId::scope(trace_id, async move {
        serde_json::from_value::<Error>(payload).expect("payload deserialises")
    })
    .await;

    assert!(error.trace_id().is_none());
    assert_eq!(error.code(), ErrorCode::NotFound);
}

#[rstest]
fn serialises_camel_case_with_details(base_error: Error) {
    let error = base_error
        .with_trace_id(TRACE_ID)
        .with_details(json!({"field": "Idempotency-Key"}));

    let value = serde_json::to_value(&error).expect("error serialises");

    assert_eq!(
        value,
        json!({
            "code": "invalid_request",
            "message": "bad",
            "traceId": TRACE_ID,
            "details": {"field": "Idempotency-Key"},
        })
    );
}

#[rstest]
fn deserialising_rejects_blank_message() {
    let payload = json!({"code": "conflict", "message": " "});
    assert!(serde_json::from_value::<Error>(payload).is_err());
}

#[rstest]
fn with_reason_merges_into_object_details() {
    let error = Error::conflict("still running")
        .with_details(json!({"retryAfter": 1}))
        .with_reason("idempotency_request_in_progress");

    assert_eq!(error.reason(), Some("idempotency_request_in_progress"));
    assert_eq!(
        error.details(),
        Some(&json!({"retryAfter": 1, "code": "idempotency_request_in_progress"}))
    );
}

#[rstest]
#[case(None)]
#[case(Some(json!(["not", "an", "object"])))]
fn with_reason_replaces_missing_or_scalar_details(#[case] details: Option<Value>) {
    let mut error = Error::conflict("reused");
    if let Some(details) = details {
        error = error.with_details(details);
    }

    let error = error.with_reason("idempotency_key_reuse");

    assert_eq!(error.details(), Some(&json!({"code": "idempotency_key_reuse"})));
}

#[rstest]
fn reason_survives_the_wire() {
    let error = Error::conflict("reused").with_reason("idempotency_key_reuse");

    let decoded: Error =
        serde_json::from_value(serde_json::to_value(&error).expect("serialises"))
            .expect("deserialises");

    assert_eq!(decoded.reason(), Some("idempotency_key_reuse"));
}

#[rstest]
#[case(ErrorCode::ServiceUnavailable, true)]
#[case(ErrorCode::Conflict, false)]
#[case(ErrorCode::InternalError, false)]
#[case(ErrorCode::InvalidRequest, false)]
fn only_outages_are_transient(#[case] code: ErrorCode, #[case] transient: bool) {
    assert_eq!(code.is_transient(), transient);
}
