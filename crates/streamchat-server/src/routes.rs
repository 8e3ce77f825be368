//! HTTP routes: the event stream and its demo page.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use chrono::Utc;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::page::INDEX_HTML;
use crate::tick::Tick;

/// Shared state for the demo routes.
#[derive(Clone)]
pub struct AppState {
    interval: Duration,
    active: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl AppState {
    /// # Arguments
    ///
    /// * `interval` - Delay between events on each connection
    /// * `shutdown` - Ends every open stream when cancelled
    pub fn new(interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            active: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }

    /// Number of event streams currently connected.
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/stream", get(stream_events))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

// GET /api/stream
async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(tick_stream(state))
}

/// Decrements the connection count when the stream is dropped.
struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn register(active: &Arc<AtomicUsize>) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(active = now, "Event stream connected");
        Self {
            active: active.clone(),
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let now = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::debug!(active = now, "Event stream closed");
    }
}

/// One event per interval until the client goes away or the server shuts down.
///
/// Axum drops the stream when the connection closes, which drops the
/// interval with it.
fn tick_stream(state: AppState) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let _guard = ConnectionGuard::register(&state.active);
        let mut ticker = tokio::time::interval(state.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; events start one interval in.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = state.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match Tick::random(Utc::now()).to_event() {
                Ok(event) => yield Ok(event),
                Err(err) => tracing::warn!(error = %err, "Failed to encode tick"),
            }
        }
    }
}
