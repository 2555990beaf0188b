use std::convert::Infallible;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode, Version};
use http_body::Frame;
use http_body_util::{BodyExt, Full, StreamBody};
use tokio::time::sleep;
use tower::service_fn;
use tower::{Layer, ServiceBuilder, ServiceExt};
use http_cacheable::prelude::*;
use http_cacheable::CacheError;

/// Backend double that records every call and answers from a fixed script.
#[derive(Clone, Default)]
struct RecordingBackend {
    hit: Option<CacheEntry>,
    fail: bool,
    gets: Arc<Mutex<Vec<String>>>,
    sets: Arc<Mutex<Vec<(String, Duration)>>>,
}

impl RecordingBackend {
    fn with_hit(entry: CacheEntry) -> Self {
        Self {
            hit: Some(entry),
            ..Self::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn gets(&self) -> Vec<String> {
        self.gets.lock().expect("gets lock").clone()
    }

    fn sets(&self) -> Vec<(String, Duration)> {
        self.sets.lock().expect("sets lock").clone()
    }
}

#[async_trait]
impl CacheBackend for RecordingBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.gets.lock().expect("gets lock").push(key.to_owned());
        if self.fail {
            return Err(CacheError::Backend("unavailable".into()));
        }
        Ok(self.hit.clone())
    }

    async fn set(&self, key: String, _entry: CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        self.sets.lock().expect("sets lock").push((key, ttl));
        if self.fail {
            return Err(CacheError::Backend("unavailable".into()));
        }
        Ok(())
    }
}

fn get(uri: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Full::new(Bytes::new()))
        .expect("valid request")
}

fn post(uri: &str, body: &'static str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .expect("valid request")
}

async fn body_string(response: Response<Full<Bytes>>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collected")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("body utf-8")
}

#[tokio::test]
async fn caches_successful_gets() {
    let layer = CacheLayer::builder(InMemoryBackend::new(128))
        .ttl(Duration::from_secs(1))
        .build();

    let counter = Arc::new(AtomicUsize::new(0));

    let handler = service_fn({
        let counter = counter.clone();
        move |_req: Request<Full<Bytes>>| {
            let counter = counter.clone();
            async move {
                let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, Infallible>(Response::new(Full::<Bytes>::from(value.to_string())))
            }
        }
    });

    let service = layer.layer(handler);
    let first = service
        .clone()
        .oneshot(get("https://localhost/items"))
        .await
        .expect("first call succeeds");
    let second = service
        .oneshot(get("https://localhost/items"))
        .await
        .expect("second call succeeds");

    assert_eq!(body_string(first).await, "1");
    assert_eq!(
        body_string(second).await,
        "1",
        "second response should come from cache"
    );
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cache_hit_never_reaches_sender() {
    let cached = CacheEntry::new(
        StatusCode::OK,
        Version::HTTP_11,
        vec![("content-type".to_owned(), b"text/plain".to_vec())],
        Bytes::from_static(b"from-cache"),
    );
    let backend = RecordingBackend::with_hit(cached);
    let counter = Arc::new(AtomicUsize::new(0));

    let service = CacheLayer::new(backend.clone()).layer(service_fn({
        let counter = counter.clone();
        move |_req: Request<Full<Bytes>>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, Infallible>(Response::new(Full::<Bytes>::from("from-sender"))) }
        }
    }));

    let response = service
        .oneshot(get("https://localhost"))
        .await
        .expect("call succeeds");

    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(body_string(response).await, "from-cache");
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(backend.gets().len(), 1);
    assert!(backend.sets().is_empty());
}

#[tokio::test]
async fn miss_stores_once_with_computed_key_and_default_ttl() {
    let backend = RecordingBackend::default();
    let service = CacheLayer::builder(backend.clone())
        .ttl(Duration::from_secs(30))
        .build()
        .layer(service_fn(|_req: Request<Full<Bytes>>| async {
            Ok::<_, Infallible>(Response::new(Full::<Bytes>::from("fresh")))
        }));

    let response = service
        .oneshot(get("https://localhost"))
        .await
        .expect("call succeeds");
    assert_eq!(body_string(response).await, "fresh");

    let expected_key = "I/AgyjY2Ea28TA3vfYAZSp58e4Q=".to_owned();
    assert_eq!(backend.gets(), vec![expected_key.clone()]);
    assert_eq!(
        backend.sets(),
        vec![(expected_key, Duration::from_secs(30))]
    );
}

#[tokio::test]
async fn server_error_is_returned_but_not_stored() {
    let backend = RecordingBackend::default();
    let service = CacheLayer::new(backend.clone()).layer(service_fn(
        |_req: Request<Full<Bytes>>| async {
            let mut response = Response::new(Full::<Bytes>::from("boom"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            Ok::<_, Infallible>(response)
        },
    ));

    let response = service
        .oneshot(get("https://localhost"))
        .await
        .expect("invalid responses are not errors");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, "boom");
    assert_eq!(backend.gets().len(), 1);
    assert!(backend.sets().is_empty());
}

#[tokio::test]
async fn sender_error_propagates_without_store() {
    let backend = RecordingBackend::default();
    let service = CacheLayer::new(backend.clone()).layer(service_fn(
        |_req: Request<Full<Bytes>>| async {
            Err::<Response<Full<Bytes>>, _>(io::Error::new(
                io::ErrorKind::TimedOut,
                "upstream timed out",
            ))
        },
    ));

    let err = service
        .oneshot(get("https://localhost"))
        .await
        .expect_err("sender error is propagated");

    let io_err = err
        .downcast_ref::<io::Error>()
        .expect("original error type is preserved");
    assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);
    assert_eq!(backend.gets().len(), 1);
    assert!(backend.sets().is_empty());
}

#[tokio::test]
async fn request_ttl_override_wins_over_default() {
    let backend = RecordingBackend::default();
    let service = CacheLayer::builder(backend.clone())
        .ttl(Duration::from_secs(60))
        .build()
        .layer(service_fn(|_req: Request<Full<Bytes>>| async {
            Ok::<_, Infallible>(Response::new(Full::<Bytes>::from("ok")))
        }));

    let request = get("https://localhost")
        .cache_config(CacheConfig::new().with_ttl(Duration::from_secs(5)));
    service.oneshot(request).await.expect("call succeeds");

    let sets = backend.sets();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].1, Duration::from_secs(5));
}

#[tokio::test]
async fn explicit_zero_ttl_is_passed_to_backend() {
    let backend = RecordingBackend::default();
    let service = CacheLayer::new(backend.clone()).layer(service_fn(
        |_req: Request<Full<Bytes>>| async {
            Ok::<_, Infallible>(Response::new(Full::<Bytes>::from("ok")))
        },
    ));

    let request = get("https://localhost").cache_config(CacheConfig::new().with_ttl(Duration::ZERO));
    service.oneshot(request).await.expect("call succeeds");

    assert_eq!(backend.sets()[0].1, Duration::ZERO);
}

#[tokio::test]
async fn request_key_override_is_used_for_lookup_and_store() {
    let backend = RecordingBackend::default();
    let service = CacheLayer::new(backend.clone()).layer(service_fn(
        |_req: Request<Full<Bytes>>| async {
            Ok::<_, Infallible>(Response::new(Full::<Bytes>::from("ok")))
        },
    ));

    let request = get("https://localhost/users?page=2")
        .cache_config(CacheConfig::new().with_key("users-page-2"));
    service.oneshot(request).await.expect("call succeeds");

    assert_eq!(backend.gets(), vec!["users-page-2".to_owned()]);
    assert_eq!(backend.sets()[0].0, "users-page-2");
}

#[tokio::test]
async fn request_body_reaches_sender_and_separates_entries() {
    let layer = CacheLayer::new_in_memory(128);
    let counter = Arc::new(AtomicUsize::new(0));

    let service = layer.layer(service_fn({
        let counter = counter.clone();
        move |req: Request<Full<Bytes>>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let body = req.into_body().collect().await?.to_bytes();
                Ok::<_, Infallible>(Response::new(Full::new(body)))
            }
        }
    }));

    let first = service
        .clone()
        .oneshot(post("https://localhost", r#"{"limit":1}"#))
        .await
        .expect("first call succeeds");
    let second = service
        .clone()
        .oneshot(post("https://localhost", r#"{"limit":2}"#))
        .await
        .expect("second call succeeds");
    let repeat = service
        .oneshot(post("https://localhost", r#"{"limit":1}"#))
        .await
        .expect("repeat call succeeds");

    assert_eq!(body_string(first).await, r#"{"limit":1}"#);
    assert_eq!(body_string(second).await, r#"{"limit":2}"#);
    assert_eq!(body_string(repeat).await, r#"{"limit":1}"#);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn reordered_query_hits_same_entry() {
    let layer = CacheLayer::new_in_memory(128);
    let counter = Arc::new(AtomicUsize::new(0));

    let service = layer.layer(service_fn({
        let counter = counter.clone();
        move |_req: Request<Full<Bytes>>| {
            let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, Infallible>(Response::new(Full::<Bytes>::from(value.to_string()))) }
        }
    }));

    let first = service
        .clone()
        .oneshot(get("https://localhost/?id=1&limit=1"))
        .await
        .expect("first call succeeds");
    let second = service
        .oneshot(get("https://localhost/?limit=1&id=1"))
        .await
        .expect("second call succeeds");

    assert_eq!(body_string(first).await, "1");
    assert_eq!(body_string(second).await, "1");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn custom_validator_replaces_status_check() {
    let backend = RecordingBackend::default();
    let service = CacheLayer::builder(backend.clone())
        .validator(|response: &Response<Bytes>| response.status() == StatusCode::NOT_FOUND)
        .build()
        .layer(service_fn(|req: Request<Full<Bytes>>| async move {
            let mut response = Response::new(Full::<Bytes>::from("body"));
            if req.uri().path() == "/missing" {
                *response.status_mut() = StatusCode::NOT_FOUND;
            }
            Ok::<_, Infallible>(response)
        }));

    service
        .clone()
        .oneshot(get("https://localhost/present"))
        .await
        .expect("call succeeds");
    assert!(backend.sets().is_empty(), "200 rejected by custom validator");

    service
        .oneshot(get("https://localhost/missing"))
        .await
        .expect("call succeeds");
    assert_eq!(backend.sets().len(), 1, "404 accepted by custom validator");
}

#[tokio::test]
async fn backend_failures_do_not_fail_the_request() {
    let backend = RecordingBackend::failing();
    let counter = Arc::new(AtomicUsize::new(0));
    let service = CacheLayer::new(backend.clone()).layer(service_fn({
        let counter = counter.clone();
        move |_req: Request<Full<Bytes>>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, Infallible>(Response::new(Full::<Bytes>::from("ok"))) }
        }
    }));

    let response = service
        .oneshot(get("https://localhost"))
        .await
        .expect("lookup failure treated as miss");

    assert_eq!(body_string(response).await, "ok");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(backend.sets().len(), 1);
}

#[tokio::test]
async fn stacked_layers_compose() {
    let outer = RecordingBackend::default();
    let inner = InMemoryBackend::new(16);
    let counter = Arc::new(AtomicUsize::new(0));

    let service = ServiceBuilder::new()
        .layer(CacheLayer::new(outer.clone()))
        .layer(CacheLayer::new(inner))
        .service(service_fn({
            let counter = counter.clone();
            move |_req: Request<Full<Bytes>>| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, Infallible>(Response::new(Full::<Bytes>::from("ok"))) }
            }
        }));

    service
        .clone()
        .oneshot(get("https://localhost/stacked"))
        .await
        .expect("first call succeeds");
    let second = service
        .oneshot(get("https://localhost/stacked"))
        .await
        .expect("second call succeeds");

    assert_eq!(body_string(second).await, "ok");
    assert_eq!(counter.load(Ordering::SeqCst), 1, "inner layer served the repeat");
    assert_eq!(outer.gets().len(), 2);
    assert_eq!(outer.gets()[0], outer.gets()[1]);
}

fn broken_body() -> StreamBody<futures_util::stream::Iter<std::vec::IntoIter<Result<Frame<Bytes>, io::Error>>>> {
    StreamBody::new(futures_util::stream::iter(vec![
        Ok(Frame::data(Bytes::from_static(b"par"))),
        Err(io::Error::new(io::ErrorKind::UnexpectedEof, "client went away")),
    ]))
}

#[tokio::test]
async fn unreadable_body_is_keyed_on_bytes_read() {
    let backend = RecordingBackend::default();
    let service = CacheLayer::new(backend.clone()).layer(service_fn(
        |req: Request<Full<Bytes>>| async move {
            let body = req.into_body().collect().await?.to_bytes();
            Ok::<_, Infallible>(Response::new(Full::new(body)))
        },
    ));

    let request = Request::builder()
        .method(Method::POST)
        .uri("https://localhost")
        .body(broken_body())
        .expect("valid request");

    let response = service.oneshot(request).await.expect("call succeeds");

    assert_eq!(body_string(response).await, "par");
    let expected = compute_key(
        &Request::builder()
            .method(Method::POST)
            .uri("https://localhost")
            .body("par")
            .expect("valid request"),
    );
    assert_eq!(backend.gets(), vec![expected]);
    assert_eq!(backend.sets().len(), 1);
}

#[tokio::test]
async fn unreadable_body_bypasses_cache_when_configured() {
    let backend = RecordingBackend::default();
    let service = CacheLayer::builder(backend.clone())
        .bypass_on_body_error(true)
        .build()
        .layer(service_fn(|_req: Request<Full<Bytes>>| async {
            Ok::<_, Infallible>(Response::new(Full::<Bytes>::from("ok")))
        }));

    let request = Request::builder()
        .method(Method::POST)
        .uri("https://localhost")
        .body(broken_body())
        .expect("valid request");

    let response = service.oneshot(request).await.expect("call succeeds");

    assert_eq!(body_string(response).await, "ok");
    assert!(backend.gets().is_empty());
    assert!(backend.sets().is_empty());
}

#[tokio::test]
async fn in_memory_entries_expire_after_ttl() {
    let layer = CacheLayer::builder(InMemoryBackend::new(128))
        .ttl(Duration::from_millis(100))
        .build();
    let counter = Arc::new(AtomicUsize::new(0));

    let service = layer.layer(service_fn({
        let counter = counter.clone();
        move |_req: Request<Full<Bytes>>| {
            let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, Infallible>(Response::new(Full::<Bytes>::from(value.to_string()))) }
        }
    }));

    let first = service
        .clone()
        .oneshot(get("https://localhost/ttl"))
        .await
        .expect("first call succeeds");
    assert_eq!(body_string(first).await, "1");

    sleep(Duration::from_millis(200)).await;

    let second = service
        .oneshot(get("https://localhost/ttl"))
        .await
        .expect("second call succeeds");
    assert_eq!(body_string(second).await, "2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_callers_share_the_service() {
    let layer = CacheLayer::new_in_memory(128);
    let service = layer.layer(service_fn(|req: Request<Full<Bytes>>| async move {
        Ok::<_, Infallible>(Response::new(Full::<Bytes>::from(req.uri().path().to_owned())))
    }));

    let mut handles = Vec::new();
    for idx in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let uri = format!("https://localhost/item/{}", idx % 2);
            let response = service.oneshot(get(&uri)).await.expect("call succeeds");
            (uri, body_string(response).await)
        }));
    }

    for handle in handles {
        let (uri, body) = handle.await.expect("task joined");
        assert!(uri.ends_with(&body), "{uri} answered with {body}");
    }
}
