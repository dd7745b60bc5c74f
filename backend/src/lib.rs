//! Reliable-delivery layer for a multi-tenant booking platform.
//!
//! - `domain`: idempotency guard, outbox publisher, inbox consumer and
//!   retention sweeper, with their ports.
//! - `outbound`: Diesel repositories, webhook delivery and metrics adapters.
//! - `inbound`: Actix handlers and the periodic job runner.
//! - `middleware`: trace-id propagation and the idempotency guard.
//! - `server`: settings and application assembly.

pub mod doc;
pub mod domain;
pub mod inbound;
pub mod middleware;
pub mod outbound;
pub mod server;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

/// Public OpenAPI surface used by Swagger UI and tooling.
pub use doc::ApiDoc;
pub use domain::TraceId;
pub use middleware::Trace;
