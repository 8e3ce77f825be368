//! Server-Sent-Events demo server.
//!
//! `GET /api/stream` emits one `message` event per interval carrying
//! `{"dt", "value"}`; `GET /` serves a page that consumes it.

pub mod page;
pub mod routes;
pub mod tick;

use std::net::SocketAddr;
use std::time::Duration;

use streamchat_core::config::ServerConfig;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use routes::{AppState, router};
pub use tick::Tick;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Binds `config.addr` and serves until `shutdown` is cancelled.
pub async fn serve(config: &ServerConfig, shutdown: CancellationToken) -> Result<(), ServerError> {
    let listener = TcpListener::bind(&config.addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: config.addr.clone(),
            source,
        })?;
    serve_on(listener, Duration::from_secs(config.interval_secs.max(1)), shutdown).await
}

/// Serves on an already bound listener.
pub async fn serve_on(
    listener: TcpListener,
    interval: Duration,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    let state = AppState::new(interval, shutdown.clone());
    tracing::info!(
        ?addr,
        interval_ms = interval.as_millis() as u64,
        "Event stream server listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Event stream server stopped");
    Ok(())
}
