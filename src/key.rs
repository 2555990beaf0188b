//! Cache key generation.
//!
//! Keys are a base64-encoded SHA-1 digest over the canonical form of a
//! request: method, host, path, the sorted query parameters, the sorted
//! headers and finally the raw body bytes. Query parameters and headers are
//! rendered as `name=value1,value2` and sorted bytewise, so two requests that
//! only differ in parameter or header order produce the same key.
//!
//! Path and query components are percent-decoded to raw bytes before
//! hashing; bytes that are not valid UTF-8 are hashed as-is.
//!
//! The digest algorithm and the field order are part of the persisted key
//! format. Changing either invalidates every key already stored by a
//! provider.
//!
//! [`http::Uri`] reports the path of both `https://host` and `https://host/`
//! as `/`. Such a root path on an absolute URI is hashed as the empty path,
//! which matches keys produced for `https://host` elsewhere but not keys
//! produced for `https://host/`.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, Request, Uri};
use http_body::Body;
use http_body_util::BodyExt;
use percent_encoding::{percent_decode, percent_decode_str};
use sha1::{Digest, Sha1};

use crate::error::BoxError;

/// Type alias for the key extractor function
type KeyExtractorFn = Arc<dyn Fn(&Request<Bytes>) -> String + Send + Sync>;

/// Computes the cache key for a request whose body is already in memory.
///
/// An empty body contributes nothing to the digest.
pub fn compute_key<B>(request: &Request<B>) -> String
where
    B: AsRef<[u8]>,
{
    let mut digest = Sha1::new();
    digest.update(request.method().as_str());
    digest.update(host_component(request.uri()));
    digest.update(path_component(request.uri()));

    for param in sorted_params(request.uri()) {
        digest.update(param);
    }

    for header in sorted_headers(request.headers()) {
        digest.update(header);
    }

    let body = request.body().as_ref();
    if !body.is_empty() {
        digest.update(body);
    }

    STANDARD.encode(digest.finalize())
}

fn host_component(uri: &Uri) -> String {
    match uri.authority() {
        Some(authority) => match authority.port() {
            Some(port) => format!("{}:{}", authority.host(), port),
            None => authority.host().to_owned(),
        },
        None => String::new(),
    }
}

// An absolute URI without a path (`https://localhost`) reports `/`; the key
// format hashes that case as an empty path.
fn path_component(uri: &Uri) -> Vec<u8> {
    let path = uri.path();
    if uri.authority().is_some() && path == "/" {
        return Vec::new();
    }
    percent_decode_str(path).collect()
}

fn sorted_params(uri: &Uri) -> Vec<Vec<u8>> {
    let Some(query) = uri.query() else {
        return Vec::new();
    };

    let mut grouped: BTreeMap<Vec<u8>, Vec<Vec<u8>>> = BTreeMap::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        grouped
            .entry(decode_query_component(name))
            .or_default()
            .push(decode_query_component(value));
    }

    let mut params: Vec<Vec<u8>> = grouped
        .into_iter()
        .map(|(name, values)| {
            let mut line = name;
            line.push(b'=');
            line.extend_from_slice(&values.join(&b','));
            line
        })
        .collect();
    params.sort_unstable();
    params
}

/// Decodes a form-encoded query component: `+` is a space, then
/// percent-escapes become raw bytes.
fn decode_query_component(raw: &str) -> Vec<u8> {
    let spaced: Vec<u8> = raw
        .bytes()
        .map(|b| if b == b'+' { b' ' } else { b })
        .collect();
    percent_decode(&spaced).collect()
}

fn sorted_headers(headers: &HeaderMap) -> Vec<Vec<u8>> {
    let mut lines: Vec<Vec<u8>> = headers
        .keys()
        .map(|name| {
            let mut line = canonical_header_name(name.as_str()).into_bytes();
            line.push(b'=');
            for (idx, value) in headers.get_all(name).iter().enumerate() {
                if idx > 0 {
                    line.push(b',');
                }
                line.extend_from_slice(value.as_bytes());
            }
            line
        })
        .collect();
    lines.sort_unstable();
    lines
}

/// Renders a header name in canonical MIME form, e.g. `user-agent` becomes
/// `User-Agent`.
fn canonical_header_name(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

/// A request whose body has been read into memory.
///
/// The buffered bytes serve both the key computation and the forwarded
/// call, so hashing never consumes the body the sender receives.
#[derive(Debug)]
pub struct BufferedRequest {
    request: Request<Bytes>,
    body_intact: bool,
}

impl BufferedRequest {
    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    /// Returns `false` when reading the body failed part way. The buffered
    /// body then holds only the bytes read before the failure.
    pub fn body_intact(&self) -> bool {
        self.body_intact
    }

    pub fn into_request(self) -> Request<Bytes> {
        self.request
    }
}

/// Reads the request body fully into memory.
///
/// Read failures are not fatal: the error is logged and the bytes obtained
/// so far are kept.
pub async fn buffer_request<B>(request: Request<B>) -> BufferedRequest
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let (parts, body) = request.into_parts();
    let mut body = Box::pin(body);
    let mut buffer = BytesMut::new();

    let body_intact = loop {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    buffer.put(data);
                }
            }
            Some(Err(err)) => {
                let err: BoxError = err.into();
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    error = %err,
                    read = buffer.len(),
                    "request body unreadable, keying on the bytes read so far"
                );
                drop(err);
                break false;
            }
            None => break true,
        }
    };

    BufferedRequest {
        request: Request::from_parts(parts, buffer.freeze()),
        body_intact,
    }
}

/// Strategy used to turn requests into cache keys.
///
/// [`KeyExtractor::hashed`] is the default and uses [`compute_key`]. A
/// custom extractor can be supplied with [`KeyExtractor::custom`]; a per-request
/// key attached through [`CacheConfig`](crate::config::CacheConfig) still
/// takes precedence over either.
#[derive(Clone)]
pub struct KeyExtractor {
    inner: KeyExtractorFn,
}

impl KeyExtractor {
    pub fn hashed() -> Self {
        Self {
            inner: Arc::new(|request: &Request<Bytes>| compute_key(request)),
        }
    }

    pub fn custom<F>(func: F) -> Self
    where
        F: Fn(&Request<Bytes>) -> String + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(func),
        }
    }

    /// Extracts a cache key from a buffered request.
    pub fn extract(&self, request: &Request<Bytes>) -> String {
        (self.inner)(request)
    }
}

impl Default for KeyExtractor {
    fn default() -> Self {
        Self::hashed()
    }
}
