//! Per-request cache overrides.
//!
//! A [`CacheConfig`] rides along with a request in its
//! [`http::Extensions`] and lets the caller force a cache key, a TTL, or
//! both, for that single request. Requests without one use the computed key
//! and the layer's default TTL.
//!
//! ```
//! use std::time::Duration;
//! use http_cacheable::config::{CacheConfig, RequestCacheExt};
//!
//! let request = http::Request::builder()
//!     .uri("https://api.example.com/users")
//!     .cache_config(CacheConfig::new().with_key("users").with_ttl(Duration::from_secs(5)))
//!     .body(())
//!     .unwrap();
//!
//! let config = CacheConfig::from_request(&request);
//! assert_eq!(config.key(), Some("users"));
//! assert_eq!(config.ttl(), Some(Duration::from_secs(5)));
//! ```

use std::time::Duration;

use http::Request;

/// Caching overrides for a single request.
///
/// An empty key counts as no key. A TTL of [`Duration::ZERO`] is an explicit
/// value and is passed to the backend as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    key: Option<String>,
    ttl: Option<Duration>,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces the cache key used for the request.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Forces the TTL handed to the backend when the response is stored.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref().filter(|key| !key.is_empty())
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Reads the override attached to `request`, or an empty config when
    /// there is none.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        request
            .extensions()
            .get::<CacheConfig>()
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the explicit key, or the one produced by `computed`.
    ///
    /// `computed` only runs when no explicit key is set.
    pub fn resolve_key<F>(&self, computed: F) -> String
    where
        F: FnOnce() -> String,
    {
        match self.key() {
            Some(key) => key.to_owned(),
            None => computed(),
        }
    }

    pub fn resolve_ttl(&self, default: Duration) -> Duration {
        self.ttl.unwrap_or(default)
    }
}

/// Attaches a [`CacheConfig`] to a request or request builder.
pub trait RequestCacheExt: Sized {
    fn cache_config(self, config: CacheConfig) -> Self;
}

impl<B> RequestCacheExt for Request<B> {
    fn cache_config(mut self, config: CacheConfig) -> Self {
        self.extensions_mut().insert(config);
        self
    }
}

impl RequestCacheExt for http::request::Builder {
    fn cache_config(self, config: CacheConfig) -> Self {
        self.extension(config)
    }
}
