//! Run with:
//! RUST_LOG=http_cacheable=debug cargo run --example client_cache

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use http_cacheable::prelude::*;
use tower::{ServiceBuilder, ServiceExt};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), http_cacheable::BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let upstream_calls = Arc::new(AtomicUsize::new(0));

    // Stands in for a real network client.
    let upstream = tower::service_fn({
        let calls = upstream_calls.clone();
        move |req: Request<Full<Bytes>>| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                let status = if req.uri().path() == "/flaky" {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::OK
                };
                let mut response = Response::new(Full::<Bytes>::from(format!(
                    "{} {} (upstream call #{call})",
                    req.method(),
                    req.uri()
                )));
                *response.status_mut() = status;
                Ok::<_, Infallible>(response)
            }
        }
    });

    let client = ServiceBuilder::new()
        .layer(
            CacheLayer::builder(InMemoryBackend::new(1_000))
                .ttl(Duration::from_secs(30))
                .build(),
        )
        .service(upstream);

    let requests = [
        get("https://api.example.com/users?page=1&limit=10")?,
        get("https://api.example.com/users?limit=10&page=1")?,
        get("https://api.example.com/flaky")?,
        get("https://api.example.com/flaky")?,
        get("https://api.example.com/users/7")?.cache_config(
            CacheConfig::new()
                .with_key("user:7")
                .with_ttl(Duration::from_secs(5)),
        ),
        get("https://api.example.com/users/7?fresh=1")?
            .cache_config(CacheConfig::new().with_key("user:7")),
    ];

    for request in requests {
        let uri = request.uri().clone();
        let response = client.clone().oneshot(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        println!("{uri} -> {status}: {}", String::from_utf8_lossy(&body));
    }

    println!(
        "upstream served {} of 6 requests",
        upstream_calls.load(Ordering::SeqCst)
    );
    Ok(())
}

fn get(uri: &str) -> Result<Request<Full<Bytes>>, http::Error> {
    Request::builder().uri(uri).body(Full::new(Bytes::new()))
}
