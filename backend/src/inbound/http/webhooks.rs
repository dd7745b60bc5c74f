//! Webhook receiver.
//!
//! ```text
//! POST /webhooks/{provider}
//! ```
//!
//! The event is stored before the provider is acknowledged, so a crash after
//! the `202` never loses it. Processing runs on a spawned task under the
//! request's trace id; failures there are logged and left for the pending
//! sweep.

use actix_web::{HttpResponse, post, web};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::domain::inbox::{ProcessOutcome, ProviderName};
use crate::domain::{ApiResult, Error, TraceId};
use crate::inbound::http::state::HttpState;

/// Acknowledgement returned to providers.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookReceipt {
    /// `received` for a first delivery, `duplicate` for a redelivery.
    #[schema(example = "received")]
    pub status: String,
}

fn event_id_of(payload: &Value) -> Result<String, Error> {
    payload
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::invalid_request("webhook payload must contain a string id"))
}

/// Store a provider callback and acknowledge it.
#[utoipa::path(
    post,
    path = "/webhooks/{provider}",
    tags = ["webhooks"],
    security([]),
    params(("provider" = String, Path, description = "Provider slug, e.g. `stripe`")),
    request_body(content = Object, description = "Provider payload with a string `id`"),
    responses(
        (status = 202, description = "Event stored", body = WebhookReceipt),
        (status = 400, description = "Malformed payload or provider", body = Error),
        (status = 503, description = "Inbox storage unavailable", body = Error)
    )
)]
#[post("/webhooks/{provider}")]
pub async fn receive_webhook(
    state: web::Data<HttpState>,
    provider: web::Path<String>,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let provider = ProviderName::new(provider.into_inner())
        .map_err(|err| Error::invalid_request(err.to_string()))?;
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| Error::invalid_request("webhook body must be JSON"))?;
    let event_id = event_id_of(&payload)?;

    let outcome = state.inbox.receive(&provider, &event_id, payload).await?;

    let inbox = state.inbox.clone();
    actix_web::rt::spawn(TraceId::carry(async move {
        match inbox.process_webhook_event(&provider, &event_id).await {
            Ok(ProcessOutcome::Processed) => {
                debug!(%provider, provider_event_id = %event_id, "webhook processed");
            }
            Ok(ProcessOutcome::AlreadyProcessed) => {}
            Err(err) => warn!(
                %provider,
                provider_event_id = %event_id,
                error = %err.message(),
                "webhook processing deferred to pending sweep"
            ),
        }
    }));

    Ok(HttpResponse::Accepted().json(WebhookReceipt {
        status: outcome.as_str().to_owned(),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::domain::inbox::{InboxConsumer, InboxConsumerConfig, WebhookHandlers};
    use crate::test_support::clock::MutableClock;
    use crate::test_support::inbox::{InMemoryInboxRepository, RecordingWebhookHandler};

    struct Fixture {
        repo: Arc<InMemoryInboxRepository>,
        handler: Arc<RecordingWebhookHandler>,
        state: web::Data<HttpState>,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryInboxRepository::new());
        let handler = Arc::new(RecordingWebhookHandler::new());
        let handlers = WebhookHandlers::new().with_handler(
            ProviderName::new("stripe").expect("valid provider"),
            handler.clone(),
        );
        let inbox = InboxConsumer::new(
            repo.clone(),
            handlers,
            Arc::new(MutableClock::default()),
            InboxConsumerConfig::default(),
        );
        Fixture {
            repo,
            handler,
            state: web::Data::new(HttpState::new(Arc::new(inbox))),
        }
    }

    async fn post(fixture: &Fixture, provider: &str, body: &str) -> (StatusCode, Value) {
        let app = test::init_service(
            App::new()
                .app_data(fixture.state.clone())
                .service(receive_webhook),
        )
        .await;
        let req = test::TestRequest::post()
            .uri(&format!("/webhooks/{provider}"))
            .insert_header(("content-type", "application/json"))
            .set_payload(body.to_owned())
            .to_request();
        let res = test::call_service(&app, req).await;
        let status = res.status();
        let body: Value = test::read_body_json(res).await;
        (status, body)
    }

    async fn wait_for_applied(handler: &RecordingWebhookHandler, expected: usize) {
        for _ in 0..50 {
            if handler.applied().len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[actix_web::test]
    async fn stores_and_processes_once_across_redeliveries() {
        let fixture = fixture();
        let body = json!({ "id": "evt_1", "type": "payment_intent.succeeded" }).to_string();

        let (status, first) = post(&fixture, "stripe", &body).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(first["status"], "received");
        wait_for_applied(&fixture.handler, 1).await;

        let (status, second) = post(&fixture, "stripe", &body).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(second["status"], "duplicate");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(fixture.repo.all().len(), 1);
        assert_eq!(
            fixture.handler.applied(),
            vec![("evt_1".to_owned(), "payment_intent.succeeded".to_owned())]
        );
    }

    #[rstest]
    #[case("stripe", "not json", "webhook body must be JSON")]
    #[case("stripe", r#"{"type":"x"}"#, "webhook payload must contain a string id")]
    #[case("stripe", r#"{"id":42}"#, "webhook payload must contain a string id")]
    #[case("Bad Provider", r#"{"id":"evt"}"#, "")]
    #[actix_web::test]
    async fn rejects_malformed_deliveries(
        #[case] provider: &str,
        #[case] body: &str,
        #[case] message: &str,
    ) {
        let fixture = fixture();
        let provider = provider.replace(' ', "%20");

        let (status, error) = post(&fixture, &provider, body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        if !message.is_empty() {
            assert_eq!(error["message"], message);
        }
        assert!(fixture.repo.all().is_empty());
    }

    #[actix_web::test]
    async fn unknown_provider_is_stored_but_left_unprocessed() {
        let fixture = fixture();
        let body = json!({ "id": "evt_9" }).to_string();

        let (status, _) = post(&fixture, "paypal", &body).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        let rows = fixture.repo.all();
        assert_eq!(rows.len(), 1);
        assert!(rows.iter().all(|row| row.processed_at.is_none()));
    }
}
