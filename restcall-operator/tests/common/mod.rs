#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use restcall_operator::{HttpClientConfig, ObjectKey};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Counters {
    hits: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

/// Local endpoint server bound to an ephemeral port.
pub struct TestServer {
    addr: SocketAddr,
    counters: Counters,
}

impl TestServer {
    pub async fn start() -> Self {
        let counters = Counters::default();
        let app = Router::new()
            .route("/ok", get(|| async { "pong" }))
            .route("/v1", get(|State(c): State<Counters>| track_as(c, "v1")))
            .route("/v2", get(|State(c): State<Counters>| track_as(c, "v2")))
            .route("/echo", get(echo))
            .route("/big", get(|| async { "x".repeat(4096) }))
            .route(
                "/fail",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    "late"
                }),
            )
            .route("/track", get(track))
            .with_state(counters.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, counters }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.counters.hits.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }
}

async fn echo(headers: HeaderMap) -> String {
    headers
        .get("x-test")
        .and_then(|v| v.to_str().ok())
        .map(|v| format!("x-test={}", v))
        .unwrap_or_default()
}

async fn track(State(counters): State<Counters>) -> &'static str {
    track_as(counters, "tracked").await
}

/// Counts the hit and the overlap with other tracked calls, then answers `body`.
async fn track_as(counters: Counters, body: &'static str) -> &'static str {
    counters.hits.fetch_add(1, Ordering::SeqCst);
    let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(30)).await;
    counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    body
}

pub fn http_config() -> HttpClientConfig {
    HttpClientConfig::default()
        .with_timeout(Duration::from_secs(1))
        .with_connect_timeout(Duration::from_millis(500))
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new("default", name)
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn wait_for<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
