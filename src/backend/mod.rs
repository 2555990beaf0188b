//! Cache providers.
//!
//! The layer talks to storage exclusively through [`CacheBackend`]: one
//! `get` per request and at most one `set`. Expiry, eviction and
//! consistency between concurrent writers are the provider's business. This
//! module ships with:
//! - [`memory::InMemoryBackend`] — a process-local provider backed by [`moka`].
//! - `redis::RedisBackend` *(optional)* — a shared provider when the
//!   `redis-backend` crate feature is enabled.

pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderName, HeaderValue, Response, StatusCode, Version};
use http_body_util::Full;
use std::time::Duration;

use crate::error::CacheError;

/// Cached response payload captured by the cache layer.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub version: Version,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
}

impl CacheEntry {
    pub fn new(
        status: StatusCode,
        version: Version,
        headers: Vec<(String, Vec<u8>)>,
        body: Bytes,
    ) -> Self {
        Self {
            status,
            version,
            headers,
            body,
        }
    }

    /// Snapshots a buffered response. The body is shared, not copied.
    pub fn from_response(response: &Response<Bytes>) -> Self {
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_vec()))
            .collect();

        Self {
            status: response.status(),
            version: response.version(),
            headers,
            body: response.body().clone(),
        }
    }

    /// Converts the entry back into an `http::Response`.
    ///
    /// Headers that no longer parse are dropped.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::from(self.body));
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(&value),
            ) {
                headers.append(name, value);
            }
        }

        response
    }
}

/// Storage contract consumed by the cache layer.
///
/// Implementations report a missing or expired key as `Ok(None)`. The TTL
/// passed to [`set`](CacheBackend::set) is advisory; the layer never checks
/// expiry itself.
#[async_trait]
pub trait CacheBackend: Send + Sync + Clone + 'static {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    async fn set(&self, key: String, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError>;
}
