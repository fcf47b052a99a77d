//! Cache tier providers.

mod moka;
mod redis;

pub use moka::MokaCacheProvider;
pub use redis::RedisCacheProvider;
