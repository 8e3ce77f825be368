//! Server-Sent-Events decoding for streaming HTTP responses.

use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use streamchat_core::GenerationError;

#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent, GenerationError>> + Send>>;

/// Splits a byte stream into SSE events. Transport errors end up as
/// [`GenerationError::Stream`].
pub fn parse_sse_stream<S, B, E>(byte_stream: S) -> SseStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + 'static,
{
    let event_stream = byte_stream
        .map(|result| result.map_err(|e| std::io::Error::other(e.to_string())))
        .eventsource()
        .map(|result| {
            result
                .map(|event| SseEvent {
                    event_type: if event.event.is_empty() {
                        None
                    } else {
                        Some(event.event)
                    },
                    data: event.data,
                    id: if event.id.is_empty() {
                        None
                    } else {
                        Some(event.id)
                    },
                })
                .map_err(|e| GenerationError::Stream(e.to_string()))
        });

    Box::pin(event_stream)
}
