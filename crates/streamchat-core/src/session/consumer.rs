//! Stream consumer: drives one in-flight generation.
//!
//! Fragments are accumulated in receipt order and every callback receives the
//! full text received so far, not the delta.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::GenerationConfig;
use crate::generation::{GenerationError, TextGenerator};

/// Callbacks fired by [`StreamConsumer::consume`].
///
/// Exactly one of `on_done` / `on_error` fires per call, and `on_chunk` never
/// fires after it. After cancellation no callback fires at all.
pub trait StreamObserver: Send {
    /// Called after each fragment with the concatenation of all fragments so far.
    fn on_chunk(&mut self, snapshot: &str);

    /// The stream was exhausted normally.
    fn on_done(&mut self);

    /// Opening or reading the stream failed.
    fn on_error(&mut self, cause: &GenerationError);
}

/// How a `consume` call ended, with the text accumulated up to that point.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeOutcome {
    Completed { text: String, chunks: usize },
    Failed { text: String, error: GenerationError },
    Cancelled { text: String },
}

impl ConsumeOutcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Completed { text, .. } | Self::Failed { text, .. } | Self::Cancelled { text } => {
                text
            }
        }
    }
}

/// Ordered fragment list plus its running concatenation.
#[derive(Debug, Default)]
struct Accumulator {
    fragments: Vec<String>,
    joined: String,
}

impl Accumulator {
    fn push(&mut self, fragment: String) -> &str {
        self.joined.push_str(&fragment);
        self.fragments.push(fragment);
        &self.joined
    }

    fn len(&self) -> usize {
        self.fragments.len()
    }

    fn into_text(self) -> String {
        self.joined
    }
}

/// Opens generations against one collaborator with fixed parameters.
#[derive(Clone)]
pub struct StreamConsumer {
    generator: Arc<dyn TextGenerator>,
    config: GenerationConfig,
}

impl StreamConsumer {
    pub fn new(generator: Arc<dyn TextGenerator>, config: GenerationConfig) -> Self {
        Self { generator, config }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Streams a response for `prompt`, reporting progress to `observer`.
    ///
    /// # Arguments
    ///
    /// * `prompt` - Passed to the generator verbatim
    /// * `observer` - Receives cumulative snapshots and exactly one terminal callback
    /// * `cancel` - Closing the transport; once fired, no further callbacks occur
    pub async fn consume<O>(
        &self,
        prompt: &str,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> ConsumeOutcome
    where
        O: StreamObserver + ?Sized,
    {
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return ConsumeOutcome::Cancelled { text: String::new() };
            }
            opened = self.generator.stream(prompt, &self.config) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(error) => {
                tracing::warn!(
                    generator = self.generator.name(),
                    error = %error,
                    "Failed to open generation stream"
                );
                observer.on_error(&error);
                return ConsumeOutcome::Failed {
                    text: String::new(),
                    error,
                };
            }
        };

        let mut accumulator = Accumulator::default();
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(chunks = accumulator.len(), "Generation stream cancelled");
                    return ConsumeOutcome::Cancelled { text: accumulator.into_text() };
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    let snapshot = accumulator.push(fragment);
                    observer.on_chunk(snapshot);
                }
                Some(Err(error)) => {
                    tracing::warn!(
                        generator = self.generator.name(),
                        chunks = accumulator.len(),
                        error = %error,
                        "Generation stream failed"
                    );
                    observer.on_error(&error);
                    return ConsumeOutcome::Failed {
                        text: accumulator.into_text(),
                        error,
                    };
                }
                None => {
                    let chunks = accumulator.len();
                    tracing::debug!(chunks, "Generation stream finished");
                    observer.on_done();
                    return ConsumeOutcome::Completed {
                        text: accumulator.into_text(),
                        chunks,
                    };
                }
            }
        }
    }
}
