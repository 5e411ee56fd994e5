use async_trait::async_trait;
use dashmap::DashMap;
use ner::{GenerationError, GenerationRequest, TextGenerator};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Generated answers keyed by request hash.
pub struct Cache {
    responses: DashMap<String, String>,
    max_entries: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl Cache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            responses: DashMap::new(),
            max_entries,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, request: &GenerationRequest) -> Option<String> {
        let key = Self::key(request);
        match self.responses.get(&key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value().clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, request: &GenerationRequest, response: String) {
        if self.max_entries == 0 {
            return;
        }
        if self.responses.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self
                .responses
                .iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.responses.remove(&key);
            }
        }
        self.responses.insert(Self::key(request), response);
    }

    fn key(request: &GenerationRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.prompt.as_bytes());
        hasher.update(request.max_new_tokens.to_le_bytes());
        hasher.update([request.return_full_text as u8, request.truncate as u8]);
        hex::encode(hasher.finalize())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            responses_cached: self.responses.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct CacheStats {
    pub responses_cached: usize,
    pub hits: usize,
    pub misses: usize,
}

/// Wraps a generator so repeated prompts skip the model.
pub struct CachedGenerator<G> {
    inner: G,
    cache: Option<Arc<Cache>>,
}

impl<G> CachedGenerator<G> {
    pub fn new(inner: G, cache: Option<Arc<Cache>>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.cache.as_ref()
    }
}

#[async_trait]
impl<G: TextGenerator> TextGenerator for CachedGenerator<G> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let Some(cache) = &self.cache else {
            return self.inner.generate(request).await;
        };

        if let Some(hit) = cache.get(request) {
            debug!("Serving generation from cache");
            return Ok(hit);
        }

        let generated = self.inner.generate(request).await?;
        cache.set(request, generated.clone());
        Ok(generated)
    }

    async fn health(&self) -> Result<(), GenerationError> {
        self.inner.health().await
    }
}
