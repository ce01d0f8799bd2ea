//! Streaming test server shared by the integration tests.

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Duration};
use tokio_stream::wrappers::ReceiverStream;

#[derive(Clone, Default)]
struct ServerState {
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    hits: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<String>>>,
}

impl ServerState {
    fn enter(&self, body: &Bytes) -> InFlightGuard {
        self.hits.fetch_add(1, Ordering::SeqCst);
        self.bodies
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(body).into_owned());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self.in_flight.clone())
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    #[serde(default = "default_chunks")]
    chunks: usize,
    #[serde(default)]
    delay_ms: u64,
    #[serde(default)]
    first_delay_ms: u64,
    #[serde(default = "default_done")]
    done: bool,
}

fn default_chunks() -> usize {
    3
}

fn default_done() -> bool {
    true
}

pub fn sse_chunk(index: usize) -> String {
    format!("data: {{\"index\":{}}}\n\n", index)
}

pub const DONE_CHUNK: &str = "data: [DONE]\n\n";

// /stream?chunks=5&delay_ms=20&first_delay_ms=50&done=true
async fn stream(
    State(state): State<ServerState>,
    Query(params): Query<StreamParams>,
    body: Bytes,
) -> Response {
    let guard = state.enter(&body);
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(4);

    tokio::spawn(async move {
        sleep(Duration::from_millis(params.first_delay_ms)).await;
        for i in 0..params.chunks {
            if i > 0 {
                sleep(Duration::from_millis(params.delay_ms)).await;
            }
            if tx.send(Ok(Bytes::from(sse_chunk(i)))).await.is_err() {
                return;
            }
        }
        if params.done {
            let _ = tx.send(Ok(Bytes::from_static(DONE_CHUNK.as_bytes()))).await;
        }
        // Leave the in-flight count before the client can see end of stream.
        drop(guard);
        drop(tx);
    });

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

// Sends headers, then never sends a body byte.
async fn hang(State(state): State<ServerState>, body: Bytes) -> Response {
    let guard = state.enter(&body);
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(1);
    tokio::spawn(async move {
        sleep(Duration::from_secs(30)).await;
        drop(guard);
        drop(tx);
    });
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

async fn slow_headers(State(state): State<ServerState>, body: Bytes) -> Response {
    let _guard = state.enter(&body);
    sleep(Duration::from_secs(30)).await;
    "late".into_response()
}

async fn overloaded(State(state): State<ServerState>, body: Bytes) -> Response {
    let _guard = state.enter(&body);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"message": "model overloaded"})),
    )
        .into_response()
}

async fn empty(State(state): State<ServerState>, body: Bytes) -> Response {
    let _guard = state.enter(&body);
    StatusCode::OK.into_response()
}

/// Running test server; shuts down on drop.
pub struct TestServer {
    pub base_url: String,
    state: ServerState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);
        let state = ServerState::default();

        let app = Router::new()
            .route("/stream", post(stream))
            .route("/hang", post(hang))
            .route("/slow_headers", post(slow_headers))
            .route("/overloaded", post(overloaded))
            .route("/empty", post(empty))
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            base_url,
            state,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn bodies(&self) -> Vec<String> {
        self.state.bodies.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Client tuned for tests: short connect timeout, pool sized for `concurrency`.
pub fn client(concurrency: usize) -> reqwest::Client {
    streamload::HttpClientBuilder::new()
        .connect_timeout(Duration::from_secs(2))
        .concurrency(concurrency)
        .build()
        .unwrap()
}
