//! Session controller: the submission lifecycle.
//!
//! One controller owns one transcript. All state lives behind a single mutex;
//! every persisted write is a synchronous read-modify-write under that mutex,
//! which is what makes the generation check in [`SessionInner::write_entry`]
//! race-free against [`SessionController::clear`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::GenerationConfig;
use crate::error::Result;
use crate::generation::{GenerationError, TextGenerator};
use crate::session::consumer::{ConsumeOutcome, StreamConsumer, StreamObserver};
use crate::transcript::{EntryStatus, Transcript, TranscriptEntry, TranscriptStore};

/// Transient, per-controller session state. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    /// A generation is in flight; new submissions are rejected.
    pub busy: bool,
    /// Bumped by `clear()`; writes tagged with an older value are discarded.
    pub generation: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Keep at most this many entries. `None` keeps the whole history.
    pub max_entries: Option<usize>,
}

/// Why a submission was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The prompt was empty after trimming.
    EmptyPrompt,
    /// Another generation is still in flight.
    Busy,
}

/// Result of a full `submit` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Completed {
        submitted_at: DateTime<Utc>,
        response: String,
    },
    Failed {
        submitted_at: DateTime<Utc>,
        reason: String,
    },
    Interrupted {
        submitted_at: DateTime<Utc>,
    },
    /// The transcript was cleared while this generation was running.
    Discarded {
        submitted_at: DateTime<Utc>,
    },
    Ignored(Rejection),
}

struct SessionCore {
    state: SessionState,
    transcript: Transcript,
    in_flight: Option<CancellationToken>,
}

struct SessionInner {
    core: Mutex<SessionCore>,
    store: TranscriptStore,
    updates: watch::Sender<Transcript>,
    options: SessionOptions,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persists and publishes the current transcript.
    ///
    /// Write failures are logged; the in-memory transcript stays authoritative.
    fn commit(&self, core: &SessionCore) {
        if let Err(err) = self.store.save(&core.transcript) {
            tracing::error!(error = %err, "Failed to persist transcript");
        }
        self.updates.send_replace(core.transcript.clone());
    }

    /// Applies `update` to the entry if it still belongs to the current generation.
    ///
    /// Returns `false` when the write is stale (cleared or removed entry).
    fn write_entry<F>(&self, generation: u64, submitted_at: &DateTime<Utc>, update: F) -> bool
    where
        F: FnOnce(&mut TranscriptEntry) -> bool,
    {
        let mut core = self.lock();
        if core.state.generation != generation {
            return false;
        }
        let Some(entry) = core.transcript.get_mut(submitted_at) else {
            return false;
        };
        if update(entry) {
            self.commit(&core);
        }
        true
    }
}

/// Holds the busy flag for one submission and releases it on every exit path.
///
/// If the submission is dropped before reaching a terminal state (task aborted,
/// future dropped, panic), the entry is finalized as interrupted.
struct BusyGuard {
    inner: Arc<SessionInner>,
    submitted_at: DateTime<Utc>,
    generation: u64,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let finalized = self
            .inner
            .write_entry(self.generation, &self.submitted_at, |entry| {
                entry.finish(EntryStatus::Interrupted)
            });
        let mut core = self.inner.lock();
        core.state.busy = false;
        core.in_flight = None;
        tracing::debug!(
            submitted_at = %self.submitted_at,
            stale = !finalized,
            "Released busy flag"
        );
    }
}

/// Writes cumulative snapshots and the terminal status into the transcript.
struct EntryWriter {
    inner: Arc<SessionInner>,
    submitted_at: DateTime<Utc>,
    generation: u64,
    stale: bool,
}

impl EntryWriter {
    fn apply<F>(&mut self, update: F)
    where
        F: FnOnce(&mut TranscriptEntry) -> bool,
    {
        if self.stale {
            return;
        }
        if !self
            .inner
            .write_entry(self.generation, &self.submitted_at, update)
        {
            tracing::debug!(
                submitted_at = %self.submitted_at,
                generation = self.generation,
                "Transcript was cleared, discarding stream writes"
            );
            self.stale = true;
        }
    }
}

impl StreamObserver for EntryWriter {
    fn on_chunk(&mut self, snapshot: &str) {
        self.apply(|entry| entry.update_response(snapshot));
    }

    fn on_done(&mut self) {
        self.apply(|entry| entry.finish(EntryStatus::Complete));
    }

    fn on_error(&mut self, cause: &GenerationError) {
        let reason = cause.to_string();
        self.apply(|entry| entry.finish(EntryStatus::Failed { reason }));
    }
}

/// An accepted submission whose entry already exists in the transcript.
///
/// The session stays busy until this value is consumed by [`Submission::run`]
/// or dropped.
pub struct Submission {
    consumer: StreamConsumer,
    prompt: String,
    cancel: CancellationToken,
    busy: BusyGuard,
}

impl Submission {
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.busy.submitted_at
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Streams the response into the transcript entry until a terminal state.
    pub async fn run(self) -> SubmitOutcome {
        let submitted_at = self.busy.submitted_at;
        let generation = self.busy.generation;
        let inner = self.busy.inner.clone();

        let mut writer = EntryWriter {
            inner: inner.clone(),
            submitted_at,
            generation,
            stale: false,
        };
        let outcome = self
            .consumer
            .consume(&self.prompt, &mut writer, &self.cancel)
            .await;

        let result = match outcome {
            ConsumeOutcome::Completed { text, chunks } => {
                tracing::info!(%submitted_at, chunks, "Generation completed");
                if writer.stale {
                    SubmitOutcome::Discarded { submitted_at }
                } else {
                    SubmitOutcome::Completed {
                        submitted_at,
                        response: text,
                    }
                }
            }
            ConsumeOutcome::Failed { error, .. } => {
                if writer.stale {
                    SubmitOutcome::Discarded { submitted_at }
                } else {
                    SubmitOutcome::Failed {
                        submitted_at,
                        reason: error.to_string(),
                    }
                }
            }
            ConsumeOutcome::Cancelled { .. } => {
                tracing::info!(%submitted_at, "Generation interrupted");
                let current = !writer.stale
                    && inner.write_entry(generation, &submitted_at, |entry| {
                        entry.finish(EntryStatus::Interrupted)
                    });
                if current {
                    SubmitOutcome::Interrupted { submitted_at }
                } else {
                    SubmitOutcome::Discarded { submitted_at }
                }
            }
        };

        // Busy flag is released here, after the entry is final.
        drop(self.busy);
        result
    }
}

/// Orchestrates submissions against one transcript.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<SessionInner>,
    consumer: StreamConsumer,
}

impl SessionController {
    /// Creates a controller and restores the persisted transcript.
    ///
    /// Entries left pending by a previous process are finalized as interrupted.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read or the repaired
    /// transcript cannot be written back. A corrupted value is not an error.
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        config: GenerationConfig,
        store: TranscriptStore,
        options: SessionOptions,
    ) -> Result<Self> {
        let mut transcript = store.load()?;
        let interrupted = transcript.interrupt_pending();
        if interrupted > 0 {
            tracing::warn!(interrupted, "Recovered entries left pending by a previous run");
            store.save(&transcript)?;
        }
        tracing::debug!(entries = transcript.len(), "Session restored");

        let (updates, _) = watch::channel(transcript.clone());
        let inner = SessionInner {
            core: Mutex::new(SessionCore {
                state: SessionState::default(),
                transcript,
                in_flight: None,
            }),
            store,
            updates,
            options,
        };

        Ok(Self {
            inner: Arc::new(inner),
            consumer: StreamConsumer::new(generator, config),
        })
    }

    /// Accepts a prompt and creates its pending entry, without streaming yet.
    ///
    /// Empty prompts and submissions while busy are rejected with no side effects.
    pub fn begin(&self, prompt: &str) -> std::result::Result<Submission, Rejection> {
        if prompt.trim().is_empty() {
            return Err(Rejection::EmptyPrompt);
        }

        let mut core = self.inner.lock();
        if core.state.busy {
            tracing::debug!("Submission rejected, session busy");
            return Err(Rejection::Busy);
        }

        let submitted_at = core.transcript.next_timestamp(Utc::now());
        if let Some(max_entries) = self.inner.options.max_entries {
            let keep = max_entries.max(1) - 1;
            let dropped = core.transcript.enforce_retention(keep);
            if dropped > 0 {
                tracing::debug!(dropped, max_entries, "Applied transcript retention");
            }
        }
        core.transcript.push(TranscriptEntry::new(submitted_at, prompt));
        core.state.busy = true;

        let cancel = CancellationToken::new();
        core.in_flight = Some(cancel.clone());
        let generation = core.state.generation;
        self.inner.commit(&core);
        drop(core);

        tracing::info!(%submitted_at, generation, "Submission accepted");
        Ok(Submission {
            consumer: self.consumer.clone(),
            prompt: prompt.to_string(),
            cancel,
            busy: BusyGuard {
                inner: self.inner.clone(),
                submitted_at,
                generation,
            },
        })
    }

    /// Submits a prompt and streams its response to completion.
    pub async fn submit(&self, prompt: &str) -> SubmitOutcome {
        match self.begin(prompt) {
            Ok(submission) => submission.run().await,
            Err(rejection) => SubmitOutcome::Ignored(rejection),
        }
    }

    /// Closes the in-flight stream, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        let core = self.inner.lock();
        match &core.in_flight {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Empties the transcript and removes the persisted value.
    ///
    /// An in-flight stream keeps running but its remaining writes are
    /// discarded; the session stays busy until that stream ends.
    pub fn clear(&self) -> Result<()> {
        let mut core = self.inner.lock();
        core.state.generation += 1;
        core.transcript.clear();
        self.inner.updates.send_replace(Transcript::new());
        tracing::info!(generation = core.state.generation, "Transcript cleared");
        self.inner.store.clear()
    }

    pub fn transcript(&self) -> Transcript {
        self.inner.lock().transcript.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_busy(&self) -> bool {
        self.state().busy
    }

    /// Receives a fresh transcript snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<Transcript> {
        self.inner.updates.subscribe()
    }

    pub fn config(&self) -> &GenerationConfig {
        self.consumer.config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::ChannelGenerator;
    use crate::transcript::{KeyValueStore, MemoryKeyValueStore, TRANSCRIPT_KEY};

    struct Harness {
        controller: SessionController,
        generator: Arc<ChannelGenerator>,
        kv: Arc<MemoryKeyValueStore>,
    }

    fn harness_with(kv: Arc<MemoryKeyValueStore>, options: SessionOptions) -> Harness {
        let generator = Arc::new(ChannelGenerator::new());
        let controller = SessionController::new(
            generator.clone(),
            GenerationConfig::default(),
            TranscriptStore::new(kv.clone()),
            options,
        )
        .unwrap();
        Harness {
            controller,
            generator,
            kv,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(MemoryKeyValueStore::new()), SessionOptions::default())
    }

    fn persisted(kv: &MemoryKeyValueStore) -> Transcript {
        match kv.get(TRANSCRIPT_KEY).unwrap() {
            Some(raw) => serde_json::from_str(&raw).unwrap(),
            None => Transcript::new(),
        }
    }

    async fn wait_until_busy(controller: &SessionController) {
        while !controller.is_busy() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_hello_scenario_progresses_snapshots() {
        let h = harness();
        let feed = h.generator.push_stream();
        let mut updates = h.controller.subscribe();

        let controller = h.controller.clone();
        let task = tokio::spawn(async move { controller.submit("Hello").await });

        updates.changed().await.unwrap();
        {
            let transcript = updates.borrow_and_update();
            let entry = transcript.last().unwrap();
            assert_eq!(entry.prompt, "Hello");
            assert_eq!(entry.response, "");
            assert_eq!(entry.status, EntryStatus::Pending);
        }

        for (fragment, expected) in [("Hi", "Hi"), (" there", "Hi there"), ("!", "Hi there!")] {
            feed.send(Ok(fragment.to_string())).unwrap();
            updates.changed().await.unwrap();
            let transcript = updates.borrow_and_update();
            assert_eq!(transcript.last().unwrap().response, expected);
        }
        drop(feed);

        let outcome = task.await.unwrap();
        assert!(matches!(
            outcome,
            SubmitOutcome::Completed { ref response, .. } if response == "Hi there!"
        ));
        assert!(!h.controller.is_busy());

        let transcript = h.controller.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.last().unwrap().status, EntryStatus::Complete);
        assert_eq!(persisted(&h.kv), transcript);
    }

    #[tokio::test]
    async fn test_empty_prompts_are_ignored() {
        let h = harness();

        for prompt in ["", "   ", "\n\t"] {
            let outcome = h.controller.submit(prompt).await;
            assert_eq!(outcome, SubmitOutcome::Ignored(Rejection::EmptyPrompt));
        }

        assert!(h.controller.transcript().is_empty());
        assert!(!h.controller.is_busy());
        assert!(h.kv.get(TRANSCRIPT_KEY).unwrap().is_none());
        assert!(h.generator.prompts().lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_while_busy_is_noop() {
        let h = harness();
        let feed = h.generator.push_stream();

        let controller = h.controller.clone();
        let task = tokio::spawn(async move { controller.submit("first").await });
        wait_until_busy(&h.controller).await;

        let outcome = h.controller.submit("A").await;
        assert_eq!(outcome, SubmitOutcome::Ignored(Rejection::Busy));
        let transcript = h.controller.transcript();
        assert_eq!(transcript.len(), 1);
        assert!(transcript.iter().all(|entry| entry.prompt != "A"));

        drop(feed);
        task.await.unwrap();
        assert!(!h.controller.is_busy());
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_response() {
        let h = harness();
        let feed = h.generator.push_stream();
        feed.send(Ok("Be".into())).unwrap();
        feed.send(Err(GenerationError::Stream("connection reset".into())))
            .unwrap();

        let outcome = h.controller.submit("Why?").await;

        assert!(matches!(
            outcome,
            SubmitOutcome::Failed { ref reason, .. } if reason.contains("connection reset")
        ));
        assert!(!h.controller.is_busy());
        let entry = h.controller.transcript().last().cloned().unwrap();
        assert_eq!(entry.response, "Be");
        assert_eq!(
            entry.status,
            EntryStatus::Failed {
                reason: "Stream error: connection reset".into()
            }
        );
    }

    #[tokio::test]
    async fn test_open_failure_records_reason() {
        let h = harness();
        h.generator
            .push_open_error(GenerationError::Config("GOOGLE_API_KEY is not set".into()));

        let outcome = h.controller.submit("Hello").await;

        assert!(matches!(outcome, SubmitOutcome::Failed { .. }));
        let entry = h.controller.transcript().last().cloned().unwrap();
        assert!(entry.response.is_empty());
        assert!(matches!(entry.status, EntryStatus::Failed { .. }));
        assert!(!h.controller.is_busy());
    }

    #[tokio::test]
    async fn test_session_accepts_next_submission_after_completion() {
        let h = harness();
        drop(h.generator.push_stream());
        let feed = h.generator.push_stream();
        feed.send(Ok("second answer".into())).unwrap();
        drop(feed);

        h.controller.submit("one").await;
        let outcome = h.controller.submit("two").await;

        assert!(matches!(outcome, SubmitOutcome::Completed { .. }));
        let transcript = h.controller.transcript();
        assert_eq!(transcript.len(), 2);
        assert!(transcript.entries()[0].submitted_at < transcript.entries()[1].submitted_at);
    }

    #[tokio::test]
    async fn test_clear_discards_in_flight_writes() {
        let h = harness();
        let feed = h.generator.push_stream();
        feed.send(Ok("before".into())).unwrap();

        let controller = h.controller.clone();
        let task = tokio::spawn(async move { controller.submit("Hello").await });
        wait_until_busy(&h.controller).await;
        while h.controller.transcript().last().map(|e| e.response.as_str()) != Some("before") {
            tokio::task::yield_now().await;
        }

        h.controller.clear().unwrap();
        assert!(h.controller.transcript().is_empty());
        assert!(h.kv.get(TRANSCRIPT_KEY).unwrap().is_none());

        // Still busy: the old stream owns the flag until it ends.
        assert_eq!(
            h.controller.submit("again").await,
            SubmitOutcome::Ignored(Rejection::Busy)
        );

        feed.send(Ok(" after".into())).unwrap();
        drop(feed);
        let outcome = task.await.unwrap();

        assert!(matches!(outcome, SubmitOutcome::Discarded { .. }));
        assert!(h.controller.transcript().is_empty());
        assert!(persisted(&h.kv).is_empty());
        assert!(!h.controller.is_busy());
        assert_eq!(h.controller.state().generation, 1);
    }

    #[tokio::test]
    async fn test_cancel_marks_entry_interrupted() {
        let h = harness();
        let feed = h.generator.push_stream();
        feed.send(Ok("par".into())).unwrap();

        let controller = h.controller.clone();
        let task = tokio::spawn(async move { controller.submit("Hello").await });
        while h.controller.transcript().last().map(|e| e.response.as_str()) != Some("par") {
            tokio::task::yield_now().await;
        }

        assert!(h.controller.cancel());
        let outcome = task.await.unwrap();

        assert!(matches!(outcome, SubmitOutcome::Interrupted { .. }));
        let entry = h.controller.transcript().last().cloned().unwrap();
        assert_eq!(entry.response, "par");
        assert_eq!(entry.status, EntryStatus::Interrupted);
        assert!(!h.controller.is_busy());
        assert!(!h.controller.cancel());
        drop(feed);
    }

    #[tokio::test]
    async fn test_dropped_submission_releases_busy() {
        let h = harness();
        let _feed = h.generator.push_stream();

        let submission = h.controller.begin("Hello").unwrap();
        assert!(h.controller.is_busy());
        assert_eq!(submission.prompt(), "Hello");

        let task = tokio::spawn(submission.run());
        tokio::task::yield_now().await;
        task.abort();
        let _ = task.await;

        assert!(!h.controller.is_busy());
        assert_eq!(
            h.controller.transcript().last().unwrap().status,
            EntryStatus::Interrupted
        );
    }

    #[tokio::test]
    async fn test_restart_recovers_pending_entry() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        {
            let h = harness_with(kv.clone(), SessionOptions::default());
            let submission = h.controller.begin("Hello").unwrap();
            // Simulate the process dying: nothing ever finalizes the entry.
            std::mem::forget(submission);
        }
        assert_eq!(
            persisted(&kv).last().unwrap().status,
            EntryStatus::Pending
        );

        let h = harness_with(kv.clone(), SessionOptions::default());

        let transcript = h.controller.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.last().unwrap().status, EntryStatus::Interrupted);
        assert_eq!(persisted(&kv), transcript);
        assert!(!h.controller.is_busy());
    }

    #[tokio::test]
    async fn test_retention_keeps_newest_entries() {
        let h = harness_with(
            Arc::new(MemoryKeyValueStore::new()),
            SessionOptions {
                max_entries: Some(2),
            },
        );

        for prompt in ["one", "two", "three"] {
            drop(h.generator.push_stream());
            h.controller.submit(prompt).await;
        }

        let prompts: Vec<_> = h
            .controller
            .transcript()
            .iter()
            .map(|entry| entry.prompt.clone())
            .collect();
        assert_eq!(prompts, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn test_independent_sessions_do_not_share_busy_flag() {
        let first = harness();
        let second = harness();
        let _feed = first.generator.push_stream();
        drop(second.generator.push_stream());

        let _submission = first.controller.begin("held").unwrap();
        let outcome = second.controller.submit("free").await;

        assert!(first.controller.is_busy());
        assert!(matches!(outcome, SubmitOutcome::Completed { .. }));
    }
}
