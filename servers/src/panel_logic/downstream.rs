use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::sse::{Event, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};

use lib_panel::core::hub::{BroadcastHub, PushFrame, SubscriberId};
use lib_panel::core::EventStreamService;

/// Shared state for the downstream HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub service: EventStreamService,
    pub hub: Arc<BroadcastHub>,
}

pub async fn run(port: u16, state: AppState, mut shutdown: broadcast::Receiver<()>) {
    // The event stream carries non-sensitive telemetry; allow any origin
    // so the dashboard can be served from anywhere.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/events", get(events_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/service/start", post(start_handler))
        .route("/service/stop", post(stop_handler))
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    log::info!("Downstream server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
        })
        .await
        .unwrap();
}

/// One live viewer connection: frames come from the hub's channel, and
/// dropping the stream (client went away) unregisters promptly instead of
/// waiting for the next publish to fail.
struct SubscriberStream {
    id: SubscriberId,
    hub: Arc<BroadcastHub>,
    rx: mpsc::Receiver<Arc<PushFrame>>,
}

impl Stream for SubscriberStream {
    type Item = Arc<PushFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for SubscriberStream {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

async fn events_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (id, rx) = state.hub.register();
    let frames = SubscriberStream { id, hub: Arc::clone(&state.hub), rx }
        .map(|frame| Ok::<Event, Infallible>(Event::default().data(frame.to_json())));

    (
        // Tell intermediaries to keep the connection open and unbuffered.
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(frames),
    )
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.status())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn start_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.start() {
        Ok(()) => (StatusCode::OK, "started".to_string()),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn stop_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.service.stop().await;
    (StatusCode::OK, "stopped")
}
