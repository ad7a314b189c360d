//! Utility functions for timestamps and content digests.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns the lowercase hex SHA-256 digest of the given parts.
///
/// Parts are separated by a NUL byte so that `("ab", "c")` and `("a", "bc")`
/// hash differently.
#[must_use]
pub fn content_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Returns a short, stable identifier derived from the given parts.
#[must_use]
pub fn short_digest(parts: &[&str]) -> String {
    let mut digest = content_digest(parts);
    digest.truncate(12);
    digest
}

/// Truncates a string to at most `max_chars` characters, appending an ellipsis.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}
