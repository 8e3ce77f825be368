//! Transcript domain model.
//!
//! Field names on disk (`dt`, `message`, `result`) are kept compatible with
//! transcripts written by the browser front-end.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Terminal state of a transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryStatus {
    /// Generation is still streaming into this entry.
    Pending,
    /// The stream ended normally.
    Complete,
    /// The stream failed; `reason` says why the response stopped growing.
    Failed { reason: String },
    /// The transport was closed before the stream ended.
    Interrupted,
}

impl EntryStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

fn default_status() -> EntryStatus {
    EntryStatus::Complete
}

/// One prompt/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Submission time; unique identifier and sort key.
    #[serde(rename = "dt")]
    pub submitted_at: DateTime<Utc>,
    /// User-submitted text.
    #[serde(rename = "message")]
    pub prompt: String,
    /// Accumulated response text.
    #[serde(rename = "result", default)]
    pub response: String,
    /// Records written before statuses existed are complete by definition.
    #[serde(default = "default_status")]
    pub status: EntryStatus,
}

impl TranscriptEntry {
    /// Creates a pending entry with an empty response.
    pub fn new(submitted_at: DateTime<Utc>, prompt: impl Into<String>) -> Self {
        Self {
            submitted_at,
            prompt: prompt.into(),
            response: String::new(),
            status: EntryStatus::Pending,
        }
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    /// Replaces the response with a newer cumulative snapshot.
    ///
    /// Returns `false` (and changes nothing) once the entry is final.
    pub fn update_response(&mut self, snapshot: &str) -> bool {
        if self.is_final() {
            return false;
        }
        debug_assert!(
            snapshot.starts_with(&self.response),
            "response snapshots must be append-only"
        );
        self.response.clear();
        self.response.push_str(snapshot);
        true
    }

    /// Moves a pending entry into a terminal state. Final entries are left alone.
    pub fn finish(&mut self, status: EntryStatus) -> bool {
        if self.is_final() || !status.is_final() {
            return false;
        }
        self.status = status;
        true
    }
}

/// Ordered prompt/response history, unique by `submitted_at`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<TranscriptEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TranscriptEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    pub fn get(&self, submitted_at: &DateTime<Utc>) -> Option<&TranscriptEntry> {
        self.entries
            .iter()
            .find(|entry| &entry.submitted_at == submitted_at)
    }

    pub fn get_mut(&mut self, submitted_at: &DateTime<Utc>) -> Option<&mut TranscriptEntry> {
        self.entries
            .iter_mut()
            .find(|entry| &entry.submitted_at == submitted_at)
    }

    /// The single entry that is still streaming, if any.
    pub fn pending(&self) -> Option<&TranscriptEntry> {
        self.entries.iter().find(|entry| !entry.is_final())
    }

    /// Picks a submission timestamp that sorts after every existing entry.
    ///
    /// Timestamps are truncated to milliseconds; collisions are bumped by 1 ms.
    pub fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = now.trunc_subsecs(3);
        match self.entries.last() {
            Some(last) if last.submitted_at >= now => {
                last.submitted_at + Duration::milliseconds(1)
            }
            _ => now,
        }
    }

    /// Appends a new entry. The caller obtains `submitted_at` from [`Self::next_timestamp`].
    pub fn push(&mut self, entry: TranscriptEntry) {
        debug_assert!(
            self.get(&entry.submitted_at).is_none(),
            "submitted_at must be unique"
        );
        debug_assert!(
            entry.is_final() || self.pending().is_none(),
            "only one entry may be streaming at a time"
        );
        self.entries.push(entry);
    }

    /// Marks every pending entry as interrupted. Returns how many changed.
    pub fn interrupt_pending(&mut self) -> usize {
        self.entries
            .iter_mut()
            .map(|entry| entry.finish(EntryStatus::Interrupted))
            .filter(|changed| *changed)
            .count()
    }

    /// Restores ordering by `submitted_at` and drops repeated timestamps.
    ///
    /// The first record for a timestamp wins. Returns how many were dropped.
    pub fn normalize(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.sort_by_key(|entry| entry.submitted_at);
        self.entries.dedup_by_key(|entry| entry.submitted_at);
        before - self.entries.len()
    }

    /// Drops the oldest finalized entries until at most `max_entries` remain.
    ///
    /// A pending entry is never dropped. Returns the number of removed entries.
    pub fn enforce_retention(&mut self, max_entries: usize) -> usize {
        let mut excess = self.entries.len().saturating_sub(max_entries);
        if excess == 0 {
            return 0;
        }
        let before = self.entries.len();
        self.entries.retain(|entry| {
            if excess > 0 && entry.is_final() {
                excess -= 1;
                false
            } else {
                true
            }
        });
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a TranscriptEntry;
    type IntoIter = std::slice::Iter<'a, TranscriptEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
