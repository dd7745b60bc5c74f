//! Reqwest-backed delivery of `WEBHOOK_*` outbox events.
//!
//! The event payload names the target and the JSON to send:
//! `{"url": "https://tenant.example/hooks", "body": {...}}`. The event's
//! delivery key travels as `Idempotency-Key` so receivers can drop the
//! duplicates that at-least-once delivery produces.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::domain::outbox::OutboxEvent;
use crate::domain::ports::{OutboxHandler, OutboxHandlerError};

const USER_AGENT: &str = concat!("booking-relay/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    url: String,
    body: Value,
}

/// Outbox handler that POSTs each event's body to the URL it carries.
pub struct HttpWebhookHandler {
    client: Client,
}

impl HttpWebhookHandler {
    /// Build a handler whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl OutboxHandler for HttpWebhookHandler {
    async fn handle(&self, event: &OutboxEvent) -> Result<(), OutboxHandlerError> {
        let (url, body) = parse_payload(&event.payload)?;
        let response = self
            .client
            .post(url)
            .header("Idempotency-Key", event.delivery_key())
            .json(&body)
            .send()
            .await
            .map_err(|err| OutboxHandlerError::transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(event_id = %event.id, status = status.as_u16(), "webhook delivered");
            return Ok(());
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(map_status_error(status, body.as_ref()))
    }
}

fn parse_payload(payload: &Value) -> Result<(Url, Value), OutboxHandlerError> {
    let WebhookPayload { url, body } = WebhookPayload::deserialize(payload).map_err(|err| {
        OutboxHandlerError::invalid_payload(format!("expected {{url, body}}: {err}"))
    })?;
    let url = Url::parse(&url)
        .map_err(|err| OutboxHandlerError::invalid_payload(format!("invalid url: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(OutboxHandlerError::invalid_payload(format!(
            "unsupported url scheme {}",
            url.scheme()
        )));
    }
    Ok((url, body))
}

fn map_status_error(status: StatusCode, body: &[u8]) -> OutboxHandlerError {
    let preview = body_preview(body);
    let message = if preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {preview}", status.as_u16())
    };
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            OutboxHandlerError::transport(message)
        }
        _ if status.is_client_error() => OutboxHandlerError::rejected(message),
        _ => OutboxHandlerError::transport(message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 120;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}
