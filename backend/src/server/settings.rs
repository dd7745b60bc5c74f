//! Relay settings loaded via OrthoConfig.
//!
//! Values layer CLI flags over `RELAY_*` environment variables over an
//! optional config file. Every field is optional at load time; accessors
//! supply the defaults so a bare environment still starts a dev relay once
//! a database URL is present.

use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_POOL_MAX_SIZE: u32 = 10;
const DEFAULT_OUTBOX_BATCH_SIZE: u32 = 50;
const DEFAULT_OUTBOX_INTERVAL_SECS: u64 = 5;
const DEFAULT_INBOX_INTERVAL_SECS: u64 = 30;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Startup configuration for the relay binary.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "RELAY")]
pub struct RelaySettings {
    /// PostgreSQL connection URL. Required at startup.
    pub database_url: Option<String>,
    /// Socket address for the HTTP listener.
    pub bind_addr: Option<String>,
    /// Maximum pooled database connections.
    pub pool_max_size: Option<u32>,
    /// Outbox rows claimed per publisher cycle.
    pub outbox_batch_size: Option<u32>,
    /// Seconds between outbox publisher cycles.
    pub outbox_interval_secs: Option<u64>,
    /// Seconds between sweeps of unprocessed webhook events.
    pub inbox_interval_secs: Option<u64>,
    /// Seconds between retention sweeps of expired idempotency keys.
    pub sweep_interval_secs: Option<u64>,
    /// Identifier stamped on claimed outbox rows.
    pub worker_id: Option<String>,
    /// Timeout for outbound webhook deliveries.
    pub webhook_timeout_secs: Option<u64>,
    /// Providers accepted with the logging handler. The environment form is
    /// comma-separated; a single slug is accepted as well.
    #[serde(default, deserialize_with = "one_or_many")]
    pub webhook_providers: Option<Vec<String>>,
    /// How long in-flight HTTP requests may run once shutdown starts.
    pub shutdown_grace_secs: Option<u64>,
}

impl RelaySettings {
    /// Database URL, if configured.
    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    /// Parse the configured bind address, falling back to `0.0.0.0:8080`.
    pub fn bind_addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.bind_addr
            .as_deref()
            .unwrap_or(DEFAULT_BIND_ADDR)
            .parse()
    }

    pub fn pool_max_size(&self) -> u32 {
        self.pool_max_size.unwrap_or(DEFAULT_POOL_MAX_SIZE).max(1)
    }

    pub fn outbox_batch_size(&self) -> u32 {
        self.outbox_batch_size
            .unwrap_or(DEFAULT_OUTBOX_BATCH_SIZE)
            .max(1)
    }

    pub fn outbox_interval(&self) -> Duration {
        seconds(self.outbox_interval_secs, DEFAULT_OUTBOX_INTERVAL_SECS)
    }

    pub fn inbox_interval(&self) -> Duration {
        seconds(self.inbox_interval_secs, DEFAULT_INBOX_INTERVAL_SECS)
    }

    pub fn sweep_interval(&self) -> Duration {
        seconds(self.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS)
    }

    pub fn webhook_timeout(&self) -> Duration {
        seconds(self.webhook_timeout_secs, DEFAULT_WEBHOOK_TIMEOUT_SECS)
    }

    pub fn shutdown_grace(&self) -> Duration {
        seconds(self.shutdown_grace_secs, DEFAULT_SHUTDOWN_GRACE_SECS)
    }

    /// Configured worker id, or a fresh `relay-<uuid>` per process.
    pub fn worker_id(&self) -> String {
        self.worker_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("relay-{}", Uuid::new_v4()))
    }

    /// Provider slugs from `webhook_providers`, trimmed, blanks dropped.
    pub fn webhook_providers(&self) -> Vec<String> {
        self.webhook_providers
            .iter()
            .flatten()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

// The env layer only turns values containing a comma into a sequence.
fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<OneOrMany>::deserialize(deserializer)?.map(|value| match value {
            OneOrMany::One(raw) => raw.split(',').map(str::to_owned).collect(),
            OneOrMany::Many(names) => names,
        }),
    )
}

/// Zero would make `tokio::time::interval` panic.
fn seconds(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default).max(1))
}
