//! Re-exports for consumers who prefer a single import.
//!
//! ```no_run
//! use http_cacheable::prelude::*;
//! # use std::time::Duration;
//! # let backend = InMemoryBackend::new(128);
//! let layer = CacheLayer::builder(backend)
//!     .ttl(Duration::from_secs(30))
//!     .build();
//! ```

pub use crate::backend::memory::InMemoryBackend;
#[cfg(feature = "redis-backend")]
pub use crate::backend::redis::RedisBackend;
pub use crate::backend::{CacheBackend, CacheEntry};
pub use crate::codec::{BincodeCodec, CacheCodec};
pub use crate::config::{CacheConfig, RequestCacheExt};
pub use crate::key::{compute_key, KeyExtractor};
pub use crate::layer::{CacheLayer, CacheLayerBuilder, CacheService};
pub use crate::policy::{CachePolicy, ResponseValidator, StatusCodeValidator};
