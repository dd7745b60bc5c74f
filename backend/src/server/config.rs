//! Listener settings for [`create_server`](super::create_server).

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

#[cfg(feature = "metrics")]
use actix_web_prom::PrometheusMetrics;

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Where the relay listens and how it drains.
pub struct ServerConfig {
    pub(crate) bind_addr: SocketAddr,
    pub(crate) workers: Option<NonZeroUsize>,
    pub(crate) shutdown_grace: Duration,
    #[cfg(feature = "metrics")]
    pub(crate) prometheus: Option<PrometheusMetrics>,
}

impl ServerConfig {
    /// One Actix worker per core and a 30 second drain.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            workers: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            #[cfg(feature = "metrics")]
            prometheus: None,
        }
    }

    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Pin the Actix worker count instead of using one per core.
    #[must_use]
    pub fn with_workers(mut self, workers: NonZeroUsize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// How long in-flight requests may run after a graceful stop. Whole
    /// seconds only; sub-second remainders are dropped and zero becomes one.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub(crate) fn shutdown_grace_secs(&self) -> u64 {
        self.shutdown_grace.as_secs().max(1)
    }

    #[cfg(feature = "metrics")]
    /// Serve `/metrics` and record HTTP metrics with `prometheus`.
    #[must_use]
    pub fn with_metrics(mut self, prometheus: PrometheusMetrics) -> Self {
        self.prometheus = Some(prometheus);
        self
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:0".parse().expect("literal")
    }

    #[rstest]
    fn defaults_drain_for_thirty_seconds() {
        let config = ServerConfig::new(addr());

        assert_eq!(config.bind_addr(), addr());
        assert_eq!(config.workers, None);
        assert_eq!(config.shutdown_grace_secs(), 30);
    }

    #[rstest]
    #[case(Duration::from_secs(5), 5)]
    #[case(Duration::from_millis(2_500), 2)]
    #[case(Duration::ZERO, 1)]
    fn shutdown_grace_is_whole_seconds(#[case] grace: Duration, #[case] secs: u64) {
        let config = ServerConfig::new(addr()).with_shutdown_grace(grace);

        assert_eq!(config.shutdown_grace_secs(), secs);
    }

    #[rstest]
    fn workers_can_be_pinned() {
        let two = NonZeroUsize::new(2).expect("non-zero");
        let config = ServerConfig::new(addr()).with_workers(two);

        assert_eq!(config.workers, Some(two));
    }
}
