//! Request fingerprints.
//!
//! A retry is only recognised as a retry when its body fingerprint matches
//! the one stored under the key. JSON bodies are fingerprinted in canonical
//! form (object keys sorted at every depth, no insignificant whitespace), so
//! a client that re-serialises its payload between attempts still matches.
//! Other bodies are fingerprinted byte for byte.

use std::io::Write;

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

const DIGEST_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestHashError {
    /// A stored fingerprint column held the wrong number of bytes.
    #[error("request hash must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("failed to encode canonical JSON: {message}")]
    Serialization { message: String },
}

/// SHA-256 fingerprint of a request body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestHash([u8; DIGEST_LEN]);

impl RequestHash {
    /// Rebuild a fingerprint read back from the store.
    ///
    /// ```
    /// # use booking_relay::domain::idempotency::RequestHash;
    /// let hash = RequestHash::try_from_bytes(&[7u8; 32]).expect("32 bytes");
    /// assert_eq!(hash.as_bytes(), &[7u8; 32]);
    /// assert!(RequestHash::try_from_bytes(&[7u8; 16]).is_err());
    /// ```
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, RequestHashError> {
        <[u8; DIGEST_LEN]>::try_from(bytes)
            .map(Self)
            .map_err(|_| RequestHashError::InvalidLength {
                expected: DIGEST_LEN,
                actual: bytes.len(),
            })
    }

    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for RequestHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Fingerprint a parsed JSON value in canonical form.
///
/// ```
/// # use booking_relay::domain::idempotency::canonicalize_and_hash;
/// # use serde_json::json;
/// let a = json!({"slot": {"end": 2, "start": 1}, "customer": "c-1"});
/// let b = json!({"customer": "c-1", "slot": {"start": 1, "end": 2}});
/// assert_eq!(
///     canonicalize_and_hash(&a).expect("hash a"),
///     canonicalize_and_hash(&b).expect("hash b"),
/// );
/// ```
pub fn canonicalize_and_hash(value: &Value) -> Result<RequestHash, RequestHashError> {
    let mut hasher = Sha256::new();
    write_canonical(&mut hasher, value).map_err(|err| RequestHashError::Serialization {
        message: err.to_string(),
    })?;
    Ok(RequestHash(hasher.finalize().into()))
}

/// Fingerprint a raw body: canonically when it parses as JSON, otherwise as
/// bytes. The empty body hashes as the empty input.
pub fn hash_request_body(body: &[u8]) -> Result<RequestHash, RequestHashError> {
    if body.is_empty() {
        return Ok(RequestHash(Sha256::digest(body).into()));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => canonicalize_and_hash(&value),
        Err(_) => Ok(RequestHash(Sha256::digest(body).into())),
    }
}

// Emits the same bytes as compact `serde_json` output with sorted keys,
// without materialising a sorted copy of the document.
fn write_canonical<W: Write>(out: &mut W, value: &Value) -> serde_json::Result<()> {
    match value {
        Value::Object(fields) => {
            let mut entries: Vec<_> = fields.iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            out.write_all(b"{").map_err(serde_json::Error::io)?;
            for (index, (key, field)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.write_all(b",").map_err(serde_json::Error::io)?;
                }
                serde_json::to_writer(&mut *out, key)?;
                out.write_all(b":").map_err(serde_json::Error::io)?;
                write_canonical(out, field)?;
            }
            out.write_all(b"}").map_err(serde_json::Error::io)
        }
        Value::Array(items) => {
            out.write_all(b"[").map_err(serde_json::Error::io)?;
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.write_all(b",").map_err(serde_json::Error::io)?;
                }
                write_canonical(out, item)?;
            }
            out.write_all(b"]").map_err(serde_json::Error::io)
        }
        scalar => serde_json::to_writer(out, scalar),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn canonical_text(value: &Value) -> String {
        let mut buf = Vec::new();
        write_canonical(&mut buf, value).expect("write to vec");
        String::from_utf8(buf).expect("utf-8")
    }

    #[test]
    fn canonical_text_sorts_nested_keys_and_keeps_array_order() {
        let value = json!({"z": [3, {"b": null, "a": "x\"y"}], "a": 1.5});
        assert_eq!(
            canonical_text(&value),
            r#"{"a":1.5,"z":[3,{"a":"x\"y","b":null}]}"#
        );
    }

    #[test]
    fn body_hash_matches_hash_of_canonical_text() {
        let body = br#"{ "party": 4, "at": "2026-01-01T19:00:00Z" }"#;
        let expected = Sha256::digest(br#"{"at":"2026-01-01T19:00:00Z","party":4}"#);
        assert_eq!(
            hash_request_body(body).expect("hash").as_bytes(),
            expected.as_slice()
        );
    }
}
