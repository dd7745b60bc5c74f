//! The closed set of write endpoints guarded by idempotency keys.

use std::fmt;

/// A critical write endpoint whose side effects must run at most once per key.
///
/// # Example
///
/// ```
/// # use booking_relay::domain::idempotency::CriticalEndpoint;
/// let endpoint = CriticalEndpoint::resolve("POST", "/api/v1/payments/intents/pi_1/confirm");
/// assert_eq!(endpoint, Some(CriticalEndpoint::ConfirmPaymentIntent));
/// assert_eq!(CriticalEndpoint::resolve("GET", "/api/v1/bookings"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CriticalEndpoint {
    /// `POST /api/v1/bookings`
    CreateBooking,
    /// `POST /api/v1/payments/intents`
    CreatePaymentIntent,
    /// `POST /api/v1/payments/intents/{id}/confirm`
    ConfirmPaymentIntent,
    /// `POST /api/v1/payments/refunds`
    CreateRefund,
    /// `POST /api/v1/availability/holds`
    HoldAvailability,
    /// `POST /api/v1/availability/holds/{id}/release`
    ReleaseHold,
}

impl CriticalEndpoint {
    /// All guarded endpoints.
    pub const ALL: [CriticalEndpoint; 6] = [
        CriticalEndpoint::CreateBooking,
        CriticalEndpoint::CreatePaymentIntent,
        CriticalEndpoint::ConfirmPaymentIntent,
        CriticalEndpoint::CreateRefund,
        CriticalEndpoint::HoldAvailability,
        CriticalEndpoint::ReleaseHold,
    ];

    /// Stable name used in logs and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateBooking => "create_booking",
            Self::CreatePaymentIntent => "create_payment_intent",
            Self::ConfirmPaymentIntent => "confirm_payment_intent",
            Self::CreateRefund => "create_refund",
            Self::HoldAvailability => "hold_availability",
            Self::ReleaseHold => "release_hold",
        }
    }

    /// HTTP method the endpoint answers to.
    pub fn method(&self) -> &'static str {
        "POST"
    }

    /// Route template; `{id}` matches exactly one non-empty path segment.
    pub fn path_template(&self) -> &'static str {
        match self {
            Self::CreateBooking => "/api/v1/bookings",
            Self::CreatePaymentIntent => "/api/v1/payments/intents",
            Self::ConfirmPaymentIntent => "/api/v1/payments/intents/{id}/confirm",
            Self::CreateRefund => "/api/v1/payments/refunds",
            Self::HoldAvailability => "/api/v1/availability/holds",
            Self::ReleaseHold => "/api/v1/availability/holds/{id}/release",
        }
    }

    /// Whether a concrete request targets this endpoint.
    pub fn matches(&self, method: &str, path: &str) -> bool {
        if !method.eq_ignore_ascii_case(self.method()) {
            return false;
        }
        let path = path.strip_suffix('/').filter(|p| !p.is_empty()).unwrap_or(path);
        let mut actual = path.split('/');
        let mut expected = self.path_template().split('/');
        loop {
            match (expected.next(), actual.next()) {
                (None, None) => return true,
                (Some("{id}"), Some(segment)) if !segment.is_empty() => {}
                (Some(want), Some(got)) if want == got => {}
                _ => return false,
            }
        }
    }

    /// Find the guarded endpoint for a request, if any.
    pub fn resolve(method: &str, path: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|endpoint| endpoint.matches(method, path))
    }
}

impl fmt::Display for CriticalEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
