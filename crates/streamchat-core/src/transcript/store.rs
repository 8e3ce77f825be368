//! Durable transcript persistence over a key-value store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;
use crate::transcript::model::Transcript;

/// Key under which the transcript is persisted.
pub const TRANSCRIPT_KEY: &str = "message";

/// A durable string key-value store.
///
/// `set` must be atomic from a reader's perspective: a `get` never observes a
/// partially written value.
pub trait KeyValueStore: Send + Sync {
    /// Returns the stored value, or `None` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrites the value for `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local store, used for ephemeral sessions and tests.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// Reads and writes the whole transcript under a single fixed key.
#[derive(Clone)]
pub struct TranscriptStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
}

impl TranscriptStore {
    /// Creates a store using [`TRANSCRIPT_KEY`].
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(kv, TRANSCRIPT_KEY)
    }

    pub fn with_key(kv: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    /// Loads the persisted transcript.
    ///
    /// A missing or unparseable value yields an empty transcript; only failures
    /// of the underlying store are returned as errors. Entries come back sorted
    /// by submission time with repeated timestamps removed.
    pub fn load(&self) -> Result<Transcript> {
        let Some(raw) = self.kv.get(&self.key)? else {
            return Ok(Transcript::new());
        };

        if raw.trim().is_empty() {
            return Ok(Transcript::new());
        }

        match serde_json::from_str::<Transcript>(&raw) {
            Ok(mut transcript) => {
                let dropped = transcript.normalize();
                if dropped > 0 {
                    tracing::warn!(
                        key = %self.key,
                        dropped,
                        "Persisted transcript had repeated timestamps"
                    );
                }
                Ok(transcript)
            }
            Err(err) => {
                tracing::warn!(
                    key = %self.key,
                    error = %err,
                    "Persisted transcript is corrupted, starting fresh"
                );
                Ok(Transcript::new())
            }
        }
    }

    /// Overwrites the persisted transcript.
    pub fn save(&self, transcript: &Transcript) -> Result<()> {
        let raw = serde_json::to_string(transcript)?;
        self.kv.set(&self.key, &raw)
    }

    /// Removes the persisted transcript entirely.
    pub fn clear(&self) -> Result<()> {
        self.kv.remove(&self.key)
    }
}

impl std::fmt::Debug for TranscriptStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptStore")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::model::{EntryStatus, TranscriptEntry};
    use chrono::{TimeZone, Utc};

    fn sample() -> Transcript {
        let base = Utc.timestamp_millis_opt(1_729_252_800_000).unwrap();
        let mut first = TranscriptEntry::new(base, "Hello");
        first.update_response("Hi there!");
        first.finish(EntryStatus::Complete);

        let mut second = TranscriptEntry::new(base + chrono::Duration::milliseconds(1), "Why?");
        second.update_response("Be");
        second.finish(EntryStatus::Failed {
            reason: "Stream error: reset".into(),
        });

        Transcript::from_entries(vec![first, second])
    }

    fn store() -> (Arc<MemoryKeyValueStore>, TranscriptStore) {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = TranscriptStore::new(kv.clone());
        (kv, store)
    }

    #[test]
    fn test_load_missing_is_empty() {
        let (_, store) = store();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let (_, store) = store();
        let transcript = sample();

        store.save(&transcript).unwrap();

        assert_eq!(store.load().unwrap(), transcript);
    }

    #[test]
    fn test_corrupted_value_starts_fresh() {
        let (kv, store) = store();
        kv.set(TRANSCRIPT_KEY, "{not json").unwrap();

        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_wrong_shape_starts_fresh() {
        let (kv, store) = store();
        kv.set(TRANSCRIPT_KEY, r#"{"dt": "x"}"#).unwrap();

        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_clear_removes_value() {
        let (kv, store) = store();
        store.save(&sample()).unwrap();

        store.clear().unwrap();

        assert!(kv.get(TRANSCRIPT_KEY).unwrap().is_none());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_custom_key_is_isolated() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let default_store = TranscriptStore::new(kv.clone());
        let other_store = TranscriptStore::with_key(kv, "other");

        other_store.save(&sample()).unwrap();

        assert!(default_store.load().unwrap().is_empty());
        assert_eq!(other_store.load().unwrap().len(), 2);
    }

    #[test]
    fn test_load_restores_order_and_unique_keys() {
        let (kv, store) = store();
        let raw = r#"[
            {"dt":"2024-10-18T12:00:02.000Z","message":"third","result":"c"},
            {"dt":"2024-10-18T12:00:00.000Z","message":"first","result":"a"},
            {"dt":"2024-10-18T12:00:02.000Z","message":"copy","result":"x"},
            {"dt":"2024-10-18T12:00:01.000Z","message":"second","result":"b"}
        ]"#;
        kv.set(TRANSCRIPT_KEY, raw).unwrap();

        let transcript = store.load().unwrap();

        let prompts: Vec<_> = transcript.iter().map(|e| e.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["first", "second", "third"]);
        let next = transcript.next_timestamp(Utc.timestamp_millis_opt(0).unwrap());
        assert!(transcript.iter().all(|entry| next > entry.submitted_at));
    }
}
