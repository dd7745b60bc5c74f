//! Liveness and readiness probes.
//!
//! The relay moves through three phases: `Starting` until the listener is
//! bound, `Serving` while it takes traffic, and `Draining` once shutdown
//! begins. Only `Serving` is ready; only `Draining` fails liveness, so
//! orchestrators stop routing before the workers stop.

use std::sync::atomic::{AtomicU8, Ordering};

use actix_web::{HttpResponse, get, http::header, web};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Starting = 0,
    Serving = 1,
    Draining = 2,
}

impl Phase {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Serving,
            _ => Self::Draining,
        }
    }
}

/// Lifecycle phase shared between `main` and the probe handlers.
#[derive(Debug)]
pub struct HealthState(AtomicU8);

impl Default for HealthState {
    fn default() -> Self {
        Self(AtomicU8::new(Phase::Starting as u8))
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        Phase::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Starting -> Serving. A draining relay never becomes ready again.
    pub fn mark_ready(&self) {
        self.0
            .compare_exchange(
                Phase::Starting as u8,
                Phase::Serving as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok();
    }

    pub fn mark_unhealthy(&self) {
        self.0.store(Phase::Draining as u8, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == Phase::Serving
    }

    pub fn is_alive(&self) -> bool {
        self.phase() != Phase::Draining
    }
}

fn probe(ok: bool) -> HttpResponse {
    let mut response = if ok {
        HttpResponse::Ok()
    } else {
        HttpResponse::ServiceUnavailable()
    };
    response
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

#[utoipa::path(
    get,
    path = "/health/ready",
    tags = ["health"],
    security([]),
    responses(
        (status = 200, description = "Relay is serving"),
        (status = 503, description = "Relay is starting or draining")
    )
)]
#[get("/health/ready")]
pub async fn ready(state: web::Data<HealthState>) -> HttpResponse {
    probe(state.is_ready())
}

#[utoipa::path(
    get,
    path = "/health/live",
    tags = ["health"],
    security([]),
    responses(
        (status = 200, description = "Relay process is up"),
        (status = 503, description = "Relay is draining")
    )
)]
#[get("/health/live")]
pub async fn live(state: web::Data<HealthState>) -> HttpResponse {
    probe(state.is_alive())
}
