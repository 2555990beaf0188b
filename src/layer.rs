use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Request, Response};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use tower::{Layer, Service};

#[cfg(feature = "metrics")]
use metrics::{counter, histogram};

use crate::backend::memory::InMemoryBackend;
use crate::backend::{CacheBackend, CacheEntry};
use crate::config::CacheConfig;
use crate::key::buffer_request;
use crate::policy::{CachePolicy, ResponseValidator};

pub use crate::error::BoxError;
pub use crate::key::KeyExtractor;

/// Caching layer for Tower HTTP clients.
///
/// The layer wraps a request sender and serves responses from a
/// [`CacheBackend`] when it has one for the request's key. On a miss the
/// request goes to the sender, and a response accepted by the policy's
/// validator is stored for the default TTL or the request's
/// [`CacheConfig`] override. Create instances via [`CacheLayer::builder`] or
/// [`CacheLayer::new`] for the default policy.
///
/// Cloning a `CacheLayer` is cheap and shares the underlying backend.
#[derive(Clone)]
pub struct CacheLayer<B> {
    backend: B,
    policy: CachePolicy,
    key_extractor: KeyExtractor,
}

/// Builder for configuring [`CacheLayer`] instances.
pub struct CacheLayerBuilder<B> {
    backend: B,
    policy: CachePolicy,
    key_extractor: KeyExtractor,
}

impl<B> CacheLayerBuilder<B>
where
    B: CacheBackend,
{
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            policy: CachePolicy::default(),
            key_extractor: KeyExtractor::default(),
        }
    }

    /// Replaces the cache policy with a pre-built value.
    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the TTL used for requests without an override.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.policy = self.policy.with_ttl(ttl);
        self
    }

    pub fn validator<V>(mut self, validator: V) -> Self
    where
        V: ResponseValidator,
    {
        self.policy = self.policy.with_validator(validator);
        self
    }

    pub fn bypass_on_body_error(mut self, enabled: bool) -> Self {
        self.policy = self.policy.with_bypass_on_body_error(enabled);
        self
    }

    pub fn key_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = extractor;
        self
    }

    pub fn build(self) -> CacheLayer<B> {
        CacheLayer {
            backend: self.backend,
            policy: self.policy,
            key_extractor: self.key_extractor,
        }
    }
}

impl CacheLayer<InMemoryBackend> {
    /// Creates a cache layer backed by an in-memory [`InMemoryBackend`].
    pub fn new_in_memory(max_capacity: u64) -> Self {
        CacheLayerBuilder::new(InMemoryBackend::new(max_capacity)).build()
    }
}

impl<B> CacheLayer<B>
where
    B: CacheBackend,
{
    /// Builds a cache layer with the default [`CachePolicy`].
    pub fn new(backend: B) -> Self {
        CacheLayerBuilder::new(backend).build()
    }

    /// Returns a builder for fine-grained control over the cache policy.
    pub fn builder(backend: B) -> CacheLayerBuilder<B> {
        CacheLayerBuilder::new(backend)
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.policy = self.policy.with_ttl(ttl);
        self
    }

    pub fn with_validator<V>(mut self, validator: V) -> Self
    where
        V: ResponseValidator,
    {
        self.policy = self.policy.with_validator(validator);
        self
    }

    pub fn with_key_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = extractor;
        self
    }
}

impl<S, B> Layer<S> for CacheLayer<B>
where
    B: CacheBackend,
{
    type Service = CacheService<S, B>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheService {
            inner,
            backend: self.backend.clone(),
            policy: self.policy.clone(),
            key_extractor: self.key_extractor.clone(),
        }
    }
}

/// Service produced by [`CacheLayer`].
///
/// The request body is buffered once; the buffered bytes feed the key and
/// are forwarded to the inner service as a [`Full`] body, so layers can be
/// stacked.
#[derive(Clone)]
pub struct CacheService<S, B> {
    inner: S,
    backend: B,
    policy: CachePolicy,
    key_extractor: KeyExtractor,
}

impl<S, B, ReqBody, ResBody> Service<Request<ReqBody>> for CacheService<S, B>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    ReqBody: Body + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: Into<BoxError>,
    ResBody: Body + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: Into<BoxError>,
    B: CacheBackend,
{
    type Response = Response<Full<Bytes>>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // The instance polled ready goes into the future; a fresh clone stays behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let backend = self.backend.clone();
        let policy = self.policy.clone();
        let key_extractor = self.key_extractor.clone();

        Box::pin(async move {
            let buffered = buffer_request(req).await;

            if !buffered.body_intact() && policy.bypass_on_body_error() {
                #[cfg(feature = "tracing")]
                tracing::debug!(uri = %buffered.request().uri(), "cache_bypass");
                #[cfg(feature = "metrics")]
                counter!("http_cacheable.bypass").increment(1);

                let response = send(&mut inner, buffered.into_request()).await?;
                return Ok(response.map(Full::new));
            }

            let config = CacheConfig::from_request(buffered.request());
            let key = config.resolve_key(|| key_extractor.extract(buffered.request()));

            #[cfg(feature = "tracing")]
            tracing::debug!(
                method = %buffered.request().method(),
                uri = %buffered.request().uri(),
                key = %key,
                "cache_call"
            );

            match backend.get(&key).await {
                Ok(Some(entry)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(key = %key, "cache_hit");
                    #[cfg(feature = "metrics")]
                    counter!("http_cacheable.hit").increment(1);

                    return Ok(entry.into_response());
                }
                Ok(None) => {}
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(key = %key, error = %_err, "cache lookup failed, treating as miss");
                    #[cfg(feature = "metrics")]
                    counter!("http_cacheable.backend_error").increment(1);
                }
            }

            #[cfg(feature = "metrics")]
            counter!("http_cacheable.miss").increment(1);

            #[cfg(feature = "metrics")]
            let start = std::time::Instant::now();
            let response = send(&mut inner, buffered.into_request()).await?;
            #[cfg(feature = "metrics")]
            histogram!("http_cacheable.upstream_latency").record(start.elapsed().as_secs_f64());

            if !policy.is_cacheable(&response) {
                #[cfg(feature = "tracing")]
                tracing::debug!(key = %key, status = %response.status(), "cache_store_skipped");
                #[cfg(feature = "metrics")]
                counter!("http_cacheable.store_skipped").increment(1);

                return Ok(response.map(Full::new));
            }

            let ttl = config.resolve_ttl(policy.ttl());
            let entry = CacheEntry::from_response(&response);
            match backend.set(key, entry, ttl).await {
                Ok(()) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(ttl = ?ttl, "cache_store");
                    #[cfg(feature = "metrics")]
                    counter!("http_cacheable.store").increment(1);
                }
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_err, "cache store failed");
                    #[cfg(feature = "metrics")]
                    counter!("http_cacheable.store_error").increment(1);
                }
            }

            Ok(response.map(Full::new))
        })
    }
}

/// Sends `request` through `inner` and buffers the response body.
async fn send<S, ResBody>(inner: &mut S, request: Request<Bytes>) -> Result<Response<Bytes>, BoxError>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ResBody: Body,
    ResBody::Error: Into<BoxError>,
{
    let response = inner
        .call(request.map(Full::new))
        .await
        .map_err(Into::<BoxError>::into)?;

    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(Into::<BoxError>::into)?
        .to_bytes();

    Ok(Response::from_parts(parts, body))
}
