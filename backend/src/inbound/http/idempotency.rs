//! Helpers for parsing idempotency and tenant headers.

use actix_web::http::header::HeaderMap;
use serde_json::json;

use crate::domain::idempotency::{IdempotencyKey, IdempotencyKeyValidationError};
use crate::domain::{Error, TenantId};

/// HTTP header name for idempotency keys.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
/// HTTP header naming the tenant that owns the request.
pub const TENANT_ID_HEADER: &str = "X-Tenant-Id";
/// Response header marking a replayed response.
pub const IDEMPOTENT_REPLAYED_HEADER: &str = "Idempotent-Replayed";

/// Extract the idempotency key from request headers.
///
/// A missing header is [`IdempotencyKeyValidationError::Missing`]; a value
/// that is not visible ASCII is treated as invalid characters.
pub fn extract_idempotency_key(
    headers: &HeaderMap,
) -> Result<IdempotencyKey, IdempotencyKeyValidationError> {
    let header_value = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .ok_or(IdempotencyKeyValidationError::Missing)?;
    let raw = header_value
        .to_str()
        .map_err(|_| IdempotencyKeyValidationError::InvalidCharacters)?;
    IdempotencyKey::new(raw)
}

/// Map idempotency key validation errors to domain errors.
pub fn map_idempotency_key_error(err: IdempotencyKeyValidationError) -> Error {
    match err {
        IdempotencyKeyValidationError::Missing => Error::invalid_request("idempotency key required"),
        other => Error::invalid_request("invalid idempotency key format")
            .with_details(json!({ "reason": other.to_string() })),
    }
}

/// Extract the tenant from the `X-Tenant-Id` header.
pub fn extract_tenant_id(headers: &HeaderMap) -> Result<TenantId, Error> {
    let value = headers
        .get(TENANT_ID_HEADER)
        .ok_or_else(|| Error::invalid_request("tenant id header required"))?;
    value
        .to_str()
        .ok()
        .and_then(|raw| TenantId::new(raw).ok())
        .ok_or_else(|| Error::invalid_request("invalid tenant id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;
    use actix_web::http::header::{HeaderName, HeaderValue};
    use rstest::rstest;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(value).expect("valid header value"),
            );
        }
        map
    }

    #[rstest]
    #[case("550e8400-e29b-41d4-a716-446655440000")]
    #[case("booking-42_retry")]
    fn valid_keys_are_extracted(#[case] raw: &str) {
        let key = extract_idempotency_key(&headers(&[("idempotency-key", raw)])).expect("valid");
        assert_eq!(key.as_str(), raw);
    }

    #[rstest]
    fn missing_key_reports_required() {
        let err = extract_idempotency_key(&HeaderMap::new()).expect_err("missing");
        assert_eq!(err, IdempotencyKeyValidationError::Missing);
        let mapped = map_idempotency_key_error(err);
        assert_eq!(mapped.code(), ErrorCode::InvalidRequest);
        assert_eq!(mapped.message(), "idempotency key required");
    }

    #[rstest]
    #[case("")]
    #[case("has space")]
    #[case("semi;colon")]
    fn malformed_keys_report_invalid_format(#[case] raw: &str) {
        let err = extract_idempotency_key(&headers(&[("idempotency-key", raw)]))
            .expect_err("invalid");
        let mapped = map_idempotency_key_error(err);
        assert_eq!(mapped.message(), "invalid idempotency key format");
        assert!(mapped.details().is_some());
    }

    #[rstest]
    fn tenant_header_is_parsed() {
        let tenant = TenantId::random();
        let parsed = extract_tenant_id(&headers(&[("x-tenant-id", &tenant.to_string())]))
            .expect("valid tenant");
        assert_eq!(parsed, tenant);
    }

    #[rstest]
    #[case(None, "tenant id header required")]
    #[case(Some("acme"), "invalid tenant id")]
    fn tenant_header_errors(#[case] value: Option<&str>, #[case] message: &str) {
        let map = value.map_or_else(HeaderMap::new, |v| headers(&[("x-tenant-id", v)]));
        let err = extract_tenant_id(&map).expect_err("rejected");
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
        assert_eq!(err.message(), message);
    }
}
