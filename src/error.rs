use std::error::Error as StdError;

use thiserror::Error;

/// Boxed error returned by the caching service.
///
/// Errors raised by the wrapped sender are boxed as-is and can be recovered
/// with `downcast_ref`.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors that can occur while interacting with a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[cfg(feature = "redis-backend")]
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}
