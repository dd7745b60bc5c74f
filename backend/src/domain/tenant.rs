//! Tenant identity shared by every record the relay layer owns.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Validation errors for [`TenantId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantIdValidationError {
    /// The identifier string was empty.
    EmptyId,
    /// The identifier string was not a valid UUID.
    InvalidId,
}

impl fmt::Display for TenantIdValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyId => write!(f, "tenant id must not be empty"),
            Self::InvalidId => write!(f, "tenant id must be a valid UUID"),
        }
    }
}

impl std::error::Error for TenantIdValidationError {}

/// Stable tenant identifier stored as a UUID.
///
/// # Examples
/// ```
/// use booking_relay::domain::TenantId;
///
/// let tenant = TenantId::new("7c9e6679-7425-40de-944b-e07fc1f90ae7").expect("valid tenant");
/// assert_eq!(tenant.to_string(), "7c9e6679-7425-40de-944b-e07fc1f90ae7");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(Uuid);

impl TenantId {
    /// Validate and construct a [`TenantId`] from borrowed input.
    pub fn new(id: impl AsRef<str>) -> Result<Self, TenantIdValidationError> {
        let raw = id.as_ref();
        if raw.is_empty() {
            return Err(TenantIdValidationError::EmptyId);
        }
        if raw.trim() != raw {
            return Err(TenantIdValidationError::InvalidId);
        }
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| TenantIdValidationError::InvalidId)
    }

    /// Wrap an already validated UUID (e.g. loaded from the database).
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a new random [`TenantId`].
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0.to_string()
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenantIdValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
