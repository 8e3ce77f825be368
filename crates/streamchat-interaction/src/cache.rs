//! In-process response cache for text generators.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use streamchat_core::{ChunkStream, GenerationConfig, GenerationError, TextGenerator};
use tokio::sync::RwLock;

/// Default number of responses kept before the oldest is evicted.
pub const DEFAULT_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    model: String,
    temperature_bits: u32,
    prompt: String,
}

impl CacheKey {
    fn new(prompt: &str, config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature_bits: config.temperature.to_bits(),
            prompt: prompt.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    responses: HashMap<CacheKey, String>,
    order: VecDeque<CacheKey>,
}

/// Bounded map of completed responses, evicted in insertion order.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    state: Arc<RwLock<CacheState>>,
    capacity: usize,
}

impl ResponseCache {
    /// Creates an empty cache holding at most `capacity` responses.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(CacheState::default())),
            capacity: capacity.max(1),
        }
    }

    async fn get(&self, key: &CacheKey) -> Option<String> {
        let state = self.state.read().await;
        state.responses.get(key).cloned()
    }

    async fn insert(&self, key: CacheKey, response: String) {
        let mut state = self.state.write().await;
        if state.responses.insert(key.clone(), response).is_none() {
            state.order.push_back(key);
        }
        while state.order.len() > self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.responses.remove(&oldest);
            }
        }
    }

    /// Number of cached responses.
    pub async fn len(&self) -> usize {
        self.state.read().await.responses.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops every cached response.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.responses.clear();
        state.order.clear();
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Wraps a generator and replays completed responses for repeated prompts.
///
/// Only streams that finish without error are recorded. A hit is replayed
/// as a single chunk. Requests with `cache = false` always reach the
/// wrapped generator.
pub struct CachingGenerator {
    inner: Arc<dyn TextGenerator>,
    cache: ResponseCache,
}

impl CachingGenerator {
    /// Wraps `inner` with a fresh cache.
    ///
    /// # Arguments
    ///
    /// * `inner` - The generator that produces uncached responses
    /// * `capacity` - Maximum number of responses to keep
    pub fn new(inner: Arc<dyn TextGenerator>, capacity: usize) -> Self {
        Self::with_cache(inner, ResponseCache::new(capacity))
    }

    /// Wraps `inner` with an existing (possibly shared) cache.
    pub fn with_cache(inner: Arc<dyn TextGenerator>, cache: ResponseCache) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}

#[async_trait]
impl TextGenerator for CachingGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn stream(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<ChunkStream, GenerationError> {
        if !config.cache {
            return self.inner.stream(prompt, config).await;
        }

        let key = CacheKey::new(prompt, config);
        if let Some(response) = self.cache.get(&key).await {
            tracing::debug!(model = %config.model, "Replaying cached response");
            return Ok(Box::pin(futures::stream::once(async move { Ok(response) })));
        }

        let mut upstream = self.inner.stream(prompt, config).await?;
        let cache = self.cache.clone();
        Ok(Box::pin(async_stream::stream! {
            let mut text = String::new();
            let mut complete = true;
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(chunk) => {
                        text.push_str(&chunk);
                        yield Ok(chunk);
                    }
                    Err(error) => {
                        complete = false;
                        yield Err(error);
                        break;
                    }
                }
            }
            if complete {
                cache.insert(key, text).await;
            }
        }))
    }
}
