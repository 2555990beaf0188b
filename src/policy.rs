use bytes::Bytes;
use http::Response;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a response returned by the wrapped sender is stored.
///
/// Any `Fn(&Response<Bytes>) -> bool` closure is a validator, so most callers
/// never implement this trait by hand.
pub trait ResponseValidator: Send + Sync + 'static {
    fn is_cacheable(&self, response: &Response<Bytes>) -> bool;
}

impl<F> ResponseValidator for F
where
    F: Fn(&Response<Bytes>) -> bool + Send + Sync + 'static,
{
    fn is_cacheable(&self, response: &Response<Bytes>) -> bool {
        self(response)
    }
}

/// Default validator: accepts status codes 200 through 299.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCodeValidator;

impl ResponseValidator for StatusCodeValidator {
    fn is_cacheable(&self, response: &Response<Bytes>) -> bool {
        response.status().is_success()
    }
}

/// Runtime cache policy shared by every service the layer produces.
///
/// Policies are cheap to clone and immutable; the `with_*` helpers return
/// new copies with the requested change.
#[derive(Clone)]
pub struct CachePolicy {
    ttl: Duration,
    validator: Arc<dyn ResponseValidator>,
    bypass_on_body_error: bool,
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("ttl", &self.ttl)
            .field("bypass_on_body_error", &self.bypass_on_body_error)
            .finish_non_exhaustive()
    }
}

impl CachePolicy {
    /// Builds a policy with an explicit default TTL and validator.
    pub fn new<V>(ttl: Duration, validator: V) -> Self
    where
        V: ResponseValidator,
    {
        Self {
            ttl,
            validator: Arc::new(validator),
            bypass_on_body_error: false,
        }
    }

    /// TTL used when the request carries no override.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_cacheable(&self, response: &Response<Bytes>) -> bool {
        self.validator.is_cacheable(response)
    }

    /// Whether a request whose body could not be read skips the cache.
    ///
    /// Off by default: such requests are keyed on the bytes that were read.
    pub fn bypass_on_body_error(&self) -> bool {
        self.bypass_on_body_error
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Replaces the validator. The new one fully overrides the status check.
    pub fn with_validator<V>(mut self, validator: V) -> Self
    where
        V: ResponseValidator,
    {
        self.validator = Arc::new(validator);
        self
    }

    pub fn with_bypass_on_body_error(mut self, enabled: bool) -> Self {
        self.bypass_on_body_error = enabled;
        self
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), StatusCodeValidator)
    }
}
