//! Identifier and digest helpers.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generates a new random UUID v4.
#[must_use]
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Generates a random session id string (hyphenated UUID v4).
///
/// Used when a tool invocation arrives without a caller-supplied session id;
/// the generated id is echoed back in `context.sessionId`.
#[must_use]
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// SHA-256 hex digest of content, used for history result digests.
#[must_use]
pub fn content_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Mask a sensitive id for logging — shows first 8 chars + "...".
#[must_use]
pub fn mask_id(id: &str) -> String {
    if id.len() <= 8 {
        id.to_owned()
    } else {
        let prefix: String = id.chars().take(8).collect();
        format!("{prefix}...")
    }
}
