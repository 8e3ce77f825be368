//! Scripted collaborators for session tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::GenerationConfig;
use crate::generation::{ChunkStream, GenerationError, TextGenerator};
use crate::session::consumer::StreamObserver;

type Feed = mpsc::UnboundedSender<Result<String, GenerationError>>;

enum Script {
    Stream(mpsc::UnboundedReceiver<Result<String, GenerationError>>),
    OpenError(GenerationError),
}

/// Generator whose streams are fed by the test through channels.
///
/// Each `stream` call pops the next queued script. A stream ends when its
/// sender is dropped, so tests control exactly when a generation finishes.
#[derive(Default)]
pub(crate) struct ChannelGenerator {
    scripts: Mutex<VecDeque<Script>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ChannelGenerator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A generator with one stream that yields `chunks` and ends.
    pub(crate) fn scripted(chunks: &[&str]) -> Self {
        let generator = Self::new();
        let feed = generator.push_stream();
        for chunk in chunks {
            feed.send(Ok((*chunk).to_string())).unwrap();
        }
        generator
    }

    pub(crate) fn push_stream(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().unwrap().push_back(Script::Stream(rx));
        tx
    }

    pub(crate) fn push_open_error(&self, error: GenerationError) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::OpenError(error));
    }

    pub(crate) fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }
}

#[async_trait]
impl TextGenerator for ChannelGenerator {
    fn name(&self) -> &str {
        "channel"
    }

    async fn stream(
        &self,
        prompt: &str,
        _config: &GenerationConfig,
    ) -> Result<ChunkStream, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Stream(rx)) => Ok(Box::pin(futures::stream::unfold(
                rx,
                |mut rx| async move { rx.recv().await.map(|item| (item, rx)) },
            ))),
            Some(Script::OpenError(error)) => Err(error),
            None => Err(GenerationError::Config("no scripted stream".into())),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingObserver {
    pub(crate) snapshots: Vec<String>,
    pub(crate) done: usize,
    pub(crate) errors: Vec<GenerationError>,
}

impl StreamObserver for RecordingObserver {
    fn on_chunk(&mut self, snapshot: &str) {
        assert!(
            self.done == 0 && self.errors.is_empty(),
            "on_chunk after terminal callback"
        );
        self.snapshots.push(snapshot.to_string());
    }

    fn on_done(&mut self) {
        self.done += 1;
    }

    fn on_error(&mut self, cause: &GenerationError) {
        self.errors.push(cause.clone());
    }
}

/// Records callbacks and reports each snapshot on a channel as it arrives.
pub(crate) struct NotifyingObserver {
    pub(crate) recorded: RecordingObserver,
    chunks: mpsc::UnboundedSender<String>,
}

impl NotifyingObserver {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (chunks, rx) = mpsc::unbounded_channel();
        let observer = Self {
            recorded: RecordingObserver::default(),
            chunks,
        };
        (observer, rx)
    }
}

impl StreamObserver for NotifyingObserver {
    fn on_chunk(&mut self, snapshot: &str) {
        self.recorded.on_chunk(snapshot);
        let _ = self.chunks.send(snapshot.to_string());
    }

    fn on_done(&mut self) {
        self.recorded.on_done();
    }

    fn on_error(&mut self, cause: &GenerationError) {
        self.recorded.on_error(cause);
    }
}
