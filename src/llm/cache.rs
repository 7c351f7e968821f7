use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{GenerationResult, ProviderId};

pub const DEFAULT_CAPACITY: usize = 128;

/// SHA-256 over the normalised request: provider, wire model, prompt, temperature bits and
/// max tokens. Fields are length-prefixed so adjacent values cannot run together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(
        provider: ProviderId,
        model: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Self {
        let mut hasher = Sha256::new();
        for field in [provider.as_str(), model, prompt] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(temperature.to_bits().to_le_bytes());
        match max_tokens {
            Some(n) => {
                hasher.update([1u8]);
                hasher.update(n.to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub capacity: usize,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

struct Inner {
    entries: LruCache<CacheKey, GenerationResult>,
    stats: CacheStats,
}

/// Process-lifetime LRU of generation results. Lookup, insert and eviction each happen
/// under one lock, so concurrent callers never observe a half-applied update.
pub struct ResponseCache {
    inner: Mutex<Inner>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats {
                    capacity: capacity.get(),
                    ..CacheStats::default()
                },
            }),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<GenerationResult> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key).cloned() {
            Some(hit) => {
                inner.stats.hits += 1;
                Some(hit)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, key: CacheKey, value: GenerationResult) {
        let mut inner = self.inner.lock();
        let replacing = inner.entries.contains(&key);
        if let Some((evicted, _)) = inner.entries.push(key, value)
            && !replacing
        {
            inner.stats.evictions += 1;
            tracing::debug!(key = evicted.as_str(), "Evicted cached response");
        }
        inner.stats.insertions += 1;
        inner.stats.entries = inner.entries.len();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TokenUsage;
    use std::sync::Arc;

    fn result(content: &str) -> GenerationResult {
        GenerationResult {
            content: content.to_string(),
            provider: ProviderId::OpenAi,
            model: "gpt-4".to_string(),
            usage: TokenUsage::new(10, 20),
            cost_usd: 0.0015,
            finish_reason: "stop".to_string(),
        }
    }

    fn key(prompt: &str) -> CacheKey {
        CacheKey::new(ProviderId::OpenAi, "gpt-4", prompt, 0.7, Some(256))
    }

    #[test]
    fn test_key_is_deterministic() {
        assert_eq!(key("hello"), key("hello"));
        assert_eq!(key("hello").as_str().len(), 64);
    }

    #[test]
    fn test_key_distinguishes_every_field() {
        let base = CacheKey::new(ProviderId::OpenAi, "gpt-4", "p", 0.7, Some(256));
        assert_ne!(base, CacheKey::new(ProviderId::Anthropic, "gpt-4", "p", 0.7, Some(256)));
        assert_ne!(base, CacheKey::new(ProviderId::OpenAi, "gpt-4o", "p", 0.7, Some(256)));
        assert_ne!(base, CacheKey::new(ProviderId::OpenAi, "gpt-4", "q", 0.7, Some(256)));
        assert_ne!(base, CacheKey::new(ProviderId::OpenAi, "gpt-4", "p", 0.71, Some(256)));
        assert_ne!(base, CacheKey::new(ProviderId::OpenAi, "gpt-4", "p", 0.7, Some(255)));
        assert_ne!(base, CacheKey::new(ProviderId::OpenAi, "gpt-4", "p", 0.7, None));
    }

    #[test]
    fn test_key_fields_do_not_run_together() {
        let a = CacheKey::new(ProviderId::OpenAi, "gpt-4a", "b", 0.0, None);
        let b = CacheKey::new(ProviderId::OpenAi, "gpt-4", "ab", 0.0, None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_get_after_put() {
        let cache = ResponseCache::new(4);
        assert!(cache.get(&key("a")).is_none());
        cache.put(key("a"), result("A"));
        assert_eq!(cache.get(&key("a")), Some(result("A")));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = ResponseCache::new(2);
        cache.put(key("a"), result("A"));
        cache.put(key("b"), result("B"));
        // touch "a" so "b" becomes the eviction candidate
        assert!(cache.get(&key("a")).is_some());
        cache.put(key("c"), result("C"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("c")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replacing_a_key_is_not_an_eviction() {
        let cache = ResponseCache::new(2);
        cache.put(key("a"), result("A"));
        cache.put(key("a"), result("A2"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(&key("a")).unwrap().content, "A2");
    }

    #[test]
    fn test_zero_capacity_clamped_to_one() {
        let cache = ResponseCache::new(0);
        cache.put(key("a"), result("A"));
        cache.put(key("b"), result("B"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().capacity, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_are_not_lost() {
        let cache = Arc::new(ResponseCache::new(64));
        let mut handles = Vec::new();
        for i in 0..32 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                let prompt = format!("prompt-{i}");
                cache.put(key(&prompt), result(&prompt));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(cache.len(), 32);
        for i in 0..32 {
            let prompt = format!("prompt-{i}");
            assert_eq!(cache.get(&key(&prompt)).unwrap().content, prompt);
        }
    }
}
