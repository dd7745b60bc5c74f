//! Client-supplied idempotency keys and their storage hash.

use std::fmt;

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Validation errors for [`IdempotencyKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyKeyValidationError {
    /// No `Idempotency-Key` header was sent.
    Missing,
    /// The key string was empty.
    Empty,
    /// The key exceeded [`IdempotencyKey::MAX_LENGTH`] characters.
    TooLong {
        /// Observed length in characters.
        length: usize,
    },
    /// The key contained characters outside `[A-Za-z0-9_-]` and was not a UUID.
    InvalidCharacters,
}

impl fmt::Display for IdempotencyKeyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "idempotency key required"),
            Self::Empty => write!(f, "idempotency key must not be empty"),
            Self::TooLong { length } => write!(
                f,
                "idempotency key must be at most {} characters, got {length}",
                IdempotencyKey::MAX_LENGTH
            ),
            Self::InvalidCharacters => write!(
                f,
                "idempotency key must be a UUID or contain only letters, digits, '_' and '-'"
            ),
        }
    }
}

impl std::error::Error for IdempotencyKeyValidationError {}

/// Opaque token a client sends to deduplicate retries of one logical attempt.
///
/// Accepts either a UUID (hyphenated or braced forms included) or 1 to 255
/// characters drawn from `[A-Za-z0-9_-]`. The raw value is never written to
/// logs: `Debug` redacts it.
///
/// # Examples
/// ```
/// use booking_relay::domain::idempotency::IdempotencyKey;
///
/// let key = IdempotencyKey::new("order-42_retry").expect("valid key");
/// assert_eq!(key.as_str(), "order-42_retry");
/// assert_eq!(key.key_hash().as_str().len(), 64);
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Longest accepted key, in characters.
    pub const MAX_LENGTH: usize = 255;

    /// Validate and construct a key.
    pub fn new(key: impl AsRef<str>) -> Result<Self, IdempotencyKeyValidationError> {
        let raw = key.as_ref();
        if raw.is_empty() {
            return Err(IdempotencyKeyValidationError::Empty);
        }
        if Uuid::parse_str(raw).is_ok() && raw.trim() == raw {
            return Ok(Self(raw.to_owned()));
        }
        let length = raw.chars().count();
        if length > Self::MAX_LENGTH {
            return Err(IdempotencyKeyValidationError::TooLong { length });
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(IdempotencyKeyValidationError::InvalidCharacters);
        }
        Ok(Self(raw.to_owned()))
    }

    /// Generate a random UUID-based key. Used by tests and internal callers.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Access the raw key.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// One-way hash stored in place of the raw key.
    pub fn key_hash(&self) -> KeyHash {
        KeyHash(hex::encode(Sha256::digest(self.0.as_bytes())))
    }
}

impl fmt::Debug for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IdempotencyKey").field(&"<redacted>").finish()
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = IdempotencyKeyValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Lowercase hex SHA-256 of an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyHash(String);

impl KeyHash {
    /// Wrap a hash loaded from storage.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Hex representation.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
