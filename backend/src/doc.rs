//! OpenAPI documentation configuration.
//!
//! [`ApiDoc`] covers the endpoints the relay serves itself: health probes
//! and the webhook receiver. Guarded business routes are documented by the
//! host application. The document backs Swagger UI in debug builds.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::domain::{Error, ErrorCode};
use crate::inbound::http::webhooks::WebhookReceipt;

/// Document the headers the idempotency guard requires on critical writes.
struct GuardHeadersAddon;

impl Modify for GuardHeadersAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi
            .components
            .get_or_insert_with(utoipa::openapi::Components::default);

        components.add_security_scheme(
            "TenantId",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                "X-Tenant-Id",
                "Tenant UUID; required on idempotency-guarded routes.",
            ))),
        );
        components.add_security_scheme(
            "IdempotencyKey",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                "Idempotency-Key",
                "Client token (UUID or 1-255 of [A-Za-z0-9_-]) scoping replays.",
            ))),
        );
    }
}

/// OpenAPI document for the relay's own HTTP surface.
#[derive(OpenApi)]
#[openapi(
    modifiers(&GuardHeadersAddon),
    info(
        title = "Booking relay API",
        description = "Health probes and inbound webhook receiver for the booking relay.",
        license(
            name = "Apache-2.0",
            url = "https://www.apache.org/licenses/LICENSE-2.0.html"
        )
    ),
    servers(
        (url = "/", description = "Relative to the deployment base URL")
    ),
    paths(
        crate::inbound::http::health::ready,
        crate::inbound::http::health::live,
        crate::inbound::http::webhooks::receive_webhook,
    ),
    components(schemas(Error, ErrorCode, WebhookReceipt)),
    tags(
        (name = "health", description = "Endpoints for health checks"),
        (name = "webhooks", description = "Provider callbacks stored in the inbox")
    )
)]
pub struct ApiDoc;
