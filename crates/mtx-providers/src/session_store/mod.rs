//! Session store backends.

mod memory;
mod redis;

pub use memory::InMemorySessionStore;
pub use redis::RedisSessionStore;

use rand::Rng;

/// Session state key: `{prefix}session:{id}`.
pub(crate) fn session_key(prefix: &str, id: &str) -> String {
    format!("{prefix}session:{id}")
}

/// Lock record key: `{prefix}lock:{id}`.
pub(crate) fn lock_key(prefix: &str, id: &str) -> String {
    format!("{prefix}lock:{id}")
}

/// Unguessable lock token: 16 random bytes, hex-encoded.
pub(crate) fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
