//! Idempotency guard middleware for critical write endpoints.
//!
//! Requests that match a [`CriticalEndpoint`] must carry `X-Tenant-Id` and
//! `Idempotency-Key` headers. The body is buffered, hashed and handed to the
//! [`IdempotencyGuard`], which either replays a stored response or lets the
//! handler run once. Successful and client-error responses are cached; server
//! errors release the key so the client can retry.
//!
//! Other routes pass through untouched.

use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_web::body::{BoxBody, MessageBody, to_bytes};
use actix_web::dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::StatusCode;
use actix_web::web::Bytes;
use actix_web::{Error, HttpResponse};
use futures_util::future::{LocalBoxFuture, Ready, ready};
use tracing::warn;

use crate::domain::idempotency::{
    CachedResponse, CriticalEndpoint, GuardDecision, GuardRequest, IdempotencyGuard,
};
use crate::inbound::http::idempotency::{
    IDEMPOTENT_REPLAYED_HEADER, extract_idempotency_key, extract_tenant_id,
    map_idempotency_key_error,
};

/// Wrap an Actix scope with the idempotency guard.
///
/// # Examples
/// ```no_run
/// use std::sync::Arc;
///
/// use actix_web::{App, web};
/// use booking_relay::domain::idempotency::IdempotencyGuard;
/// use booking_relay::middleware::IdempotencyGuardMiddleware;
///
/// fn app(guard: Arc<IdempotencyGuard>) {
///     let _app = App::new().service(
///         web::scope("/api/v1").wrap(IdempotencyGuardMiddleware::new(guard)),
///     );
/// }
/// ```
#[derive(Clone)]
pub struct IdempotencyGuardMiddleware {
    guard: Arc<IdempotencyGuard>,
}

impl IdempotencyGuardMiddleware {
    /// Create middleware backed by `guard`.
    pub fn new(guard: Arc<IdempotencyGuard>) -> Self {
        Self { guard }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IdempotencyGuardMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = IdempotencyGuardService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IdempotencyGuardService {
            service: Rc::new(service),
            guard: Arc::clone(&self.guard),
        }))
    }
}

/// Service wrapper produced by [`IdempotencyGuardMiddleware`].
pub struct IdempotencyGuardService<S> {
    service: Rc<S>,
    guard: Arc<IdempotencyGuard>,
}

impl<S, B> Service<ServiceRequest> for IdempotencyGuardService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let Some(endpoint) = CriticalEndpoint::resolve(req.method().as_str(), req.path()) else {
            let fut = self.service.call(req);
            return Box::pin(async move { Ok(fut.await?.map_into_boxed_body()) });
        };
        let service = Rc::clone(&self.service);
        let guard = Arc::clone(&self.guard);
        Box::pin(async move { guarded_call(service, guard, endpoint, req).await })
    }
}

async fn guarded_call<S, B>(
    service: Rc<S>,
    guard: Arc<IdempotencyGuard>,
    endpoint: CriticalEndpoint,
    mut req: ServiceRequest,
) -> Result<ServiceResponse<BoxBody>, Error>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    let tenant_id = match extract_tenant_id(req.headers()) {
        Ok(tenant_id) => tenant_id,
        Err(err) => return Ok(req.error_response(err)),
    };
    let key = match extract_idempotency_key(req.headers()) {
        Ok(key) => key,
        Err(err) => return Ok(req.error_response(map_idempotency_key_error(err))),
    };

    let body = match req.extract::<Bytes>().await {
        Ok(body) => body,
        Err(err) => return Ok(req.error_response(err)),
    };
    req.set_payload(replay_payload(body.clone()));

    let method = req.method().as_str().to_owned();
    let path = req.path().to_owned();
    let request = match GuardRequest::new(tenant_id, key, endpoint, &method, &path, &body) {
        Ok(request) => request,
        Err(err) => return Ok(req.error_response(err)),
    };

    let ticket = match guard.begin(&request).await {
        Ok(GuardDecision::Proceed(ticket)) => ticket,
        Ok(GuardDecision::Replay(cached)) => {
            return Ok(req.into_response(replay_response(&cached)));
        }
        Err(err) => return Ok(req.error_response(err)),
    };

    let res = match service.call(req).await {
        Ok(res) => res,
        Err(err) => {
            guard.abandon(ticket).await;
            return Err(err);
        }
    };

    let (http_req, http_res) = res.into_parts();
    let status = http_res.status();
    let headers: Vec<(String, String)> = http_res
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
        })
        .collect();
    let (head, body) = http_res.into_parts();
    let bytes = match to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let err: Box<dyn std::error::Error> = err.into();
            warn!(error = %err, endpoint = %endpoint, "failed to buffer guarded response body");
            guard.abandon(ticket).await;
            return Err(actix_web::error::ErrorInternalServerError(
                "failed to read response body",
            ));
        }
    };

    let cached = CachedResponse::new(status.as_u16(), bytes.to_vec(), headers);
    guard.finish(ticket, &cached).await;

    let res = head.set_body(BoxBody::new(bytes));
    Ok(ServiceResponse::new(http_req, res))
}

fn replay_payload(body: Bytes) -> Payload {
    let (_, mut payload) = actix_http::h1::Payload::create(true);
    payload.unread_data(body);
    Payload::from(payload)
}

fn replay_response(cached: &CachedResponse) -> HttpResponse {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = HttpResponse::build(status);
    for header in &cached.headers {
        builder.append_header((header.name.as_str(), header.value.as_str()));
    }
    builder.insert_header((IDEMPOTENT_REPLAYED_HEADER, "true"));
    builder.body(cached.body.clone())
}

#[cfg(test)]
#[path = "idempotency_tests.rs"]
mod tests;
