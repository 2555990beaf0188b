//! HTTP Cacheable
//! ==============
//!
//! `http-cacheable` adds response caching to a Tower-based HTTP client
//! without touching its call sites. Requests are turned into a deterministic
//! cache key, looked up in a pluggable [`CacheBackend`](backend::CacheBackend),
//! and only forwarded to the wrapped sender on a miss. Responses accepted by
//! the configured validator (2xx by default) are stored for the layer's TTL
//! or for the TTL attached to the individual request.
//!
//! ```no_run
//! use std::time::Duration;
//! use bytes::Bytes;
//! use http_body_util::Full;
//! use tower::{ServiceBuilder, ServiceExt};
//! use http_cacheable::prelude::*;
//!
//! # async fn run() -> Result<(), http_cacheable::BoxError> {
//! let layer = CacheLayer::builder(InMemoryBackend::new(1_000))
//!     .ttl(Duration::from_secs(30))
//!     .build();
//!
//! let client = ServiceBuilder::new()
//!     .layer(layer)
//!     .service(tower::service_fn(|_req: http::Request<Full<Bytes>>| async {
//!         Ok::<_, std::convert::Infallible>(http::Response::new(Full::<Bytes>::from("ok")))
//!     }));
//!
//! let request = http::Request::builder()
//!     .uri("https://api.example.com/users?page=1")
//!     .cache_config(CacheConfig::new().with_ttl(Duration::from_secs(5)))
//!     .body(Full::new(Bytes::new()))?;
//!
//! let response = client.oneshot(request).await?;
//! # drop(response);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod key;
pub mod layer;
pub mod policy;
pub mod prelude;

pub use config::{CacheConfig, RequestCacheExt};
pub use error::{BoxError, CacheError};
pub use key::{compute_key, KeyExtractor};
pub use layer::{CacheLayer, CacheLayerBuilder, CacheService};
pub use policy::{CachePolicy, ResponseValidator, StatusCodeValidator};
