//! Actix rendering of [`Error`].
//!
//! Every relay answer that is not a success goes through here: the guard's
//! 400/409/503 rejections, webhook validation failures and anything
//! unexpected. Internal errors keep only their trace id on the way out.
//! Failures a client can simply retry (a store outage, a key still held by a
//! concurrent request) carry `Retry-After`.

use std::borrow::Cow;

use actix_web::http::StatusCode;
use actix_web::http::header::RETRY_AFTER;
use actix_web::{HttpResponse, ResponseError};
use tracing::error;

use crate::domain::idempotency::IN_PROGRESS_CODE;
use crate::domain::{Error, ErrorCode, TRACE_ID_HEADER};

/// Seconds advertised in `Retry-After`.
pub const RETRY_AFTER_SECS: u64 = 1;

const REDACTED_MESSAGE: &str = "Internal server error";

fn retry_after(error: &Error) -> Option<u64> {
    let in_flight = error.code() == ErrorCode::Conflict && error.reason() == Some(IN_PROGRESS_CODE);
    (error.code().is_transient() || in_flight).then_some(RETRY_AFTER_SECS)
}

/// The body a client may see.
fn public_body(error: &Error) -> Cow<'_, Error> {
    if error.code() != ErrorCode::InternalError {
        return Cow::Borrowed(error);
    }
    let redacted = Error::internal(REDACTED_MESSAGE);
    Cow::Owned(match error.trace_id() {
        Some(id) => redacted.with_trace_id(id),
        None => redacted,
    })
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self.code() {
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        if let Some(id) = self.trace_id() {
            response.insert_header((TRACE_ID_HEADER, id));
        }
        if let Some(secs) = retry_after(self) {
            response.insert_header((RETRY_AFTER, secs.to_string()));
        }
        response.json(&*public_body(self))
    }
}

impl From<actix_web::Error> for Error {
    fn from(err: actix_web::Error) -> Self {
        error!(error = %err, "actix error promoted to domain error");
        Error::internal(REDACTED_MESSAGE)
    }
}
