//! Run with:
//! REDIS_URL=redis://127.0.0.1:6379/ cargo run --example redis_client_cache --features redis-backend

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use http_cacheable::prelude::*;
use redis::aio::ConnectionManager;
use redis::Client;
use tower::{ServiceBuilder, ServiceExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".into());
    let client = Client::open(redis_url)?;
    let manager: ConnectionManager = client.get_connection_manager().await?;

    let backend = RedisBackend::new(manager).with_namespace("http_cacheable_demo");

    let counter = Arc::new(AtomicUsize::new(0));
    let http_client = ServiceBuilder::new()
        .layer(
            CacheLayer::builder(backend)
                .ttl(Duration::from_secs(10))
                .build(),
        )
        .service(tower::service_fn({
            let counter = counter.clone();
            move |req: Request<Full<Bytes>>| {
                let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    Ok::<_, Infallible>(Response::new(Full::<Bytes>::from(format!(
                        "{} answered by upstream call #{value}",
                        req.uri()
                    ))))
                }
            }
        }));

    for _ in 0..3 {
        let request = Request::builder()
            .uri("https://api.example.com/catalog?page=1")
            .body(Full::new(Bytes::new()))?;
        let body = http_client
            .clone()
            .oneshot(request)
            .await?
            .into_body()
            .collect()
            .await?
            .to_bytes();
        println!("{}", String::from_utf8_lossy(&body));
    }

    Ok(())
}
