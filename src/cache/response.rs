//! LLM response cache
//!
//! Keyed by a SHA-256 digest of everything that shapes a completion: the
//! provider, the model, the full message list, sampling settings and the
//! caller's cache scope (normally the tenant).

use crate::cache::stale::{CacheLookup, CacheStats, StaleCache};
use crate::config::ResilienceConfig;
use crate::llm::adapter::{ChatMessage, CompletionOptions, LlmResponse};
use sha2::{Digest, Sha256};
use std::time::Duration;

pub struct ResponseCache {
    inner: StaleCache<LlmResponse>,
}

impl ResponseCache {
    pub fn new(fresh_ttl: Duration, stale_ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: StaleCache::new(fresh_ttl, stale_ttl, max_entries),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(
            Duration::from_secs(config.response_cache_ttl_secs),
            Duration::from_secs(config.response_cache_stale_secs),
            config.cache_max_entries,
        )
    }

    pub fn key(provider: &str, messages: &[ChatMessage], options: &CompletionOptions) -> String {
        let mut hasher = Sha256::new();
        hasher.update(provider.as_bytes());
        hasher.update([0u8]);
        hasher.update(options.model.as_deref().unwrap_or("default").as_bytes());
        hasher.update([0u8]);
        hasher.update(options.temperature.to_bits().to_le_bytes());
        hasher.update(options.max_tokens.to_le_bytes());
        hasher.update([options.json_mode as u8]);
        hasher.update(options.cache_scope.as_deref().unwrap_or("").as_bytes());
        for message in messages {
            hasher.update([0u8]);
            hasher.update(message.role.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(message.content.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> CacheLookup<LlmResponse> {
        self.inner.get(key)
    }

    pub fn put(&self, key: &str, response: LlmResponse) {
        self.inner.put(key, response);
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_depends_on_scope_and_messages() {
        let messages = vec![ChatMessage::system("s"), ChatMessage::user("net sales")];
        let a = ResponseCache::key("openai", &messages, &CompletionOptions::default().with_scope("t1"));
        let b = ResponseCache::key("openai", &messages, &CompletionOptions::default().with_scope("t2"));
        let c = ResponseCache::key("openai", &messages, &CompletionOptions::default().with_scope("t1"));
        assert_ne!(a, b);
        assert_eq!(a, c);

        let other = vec![ChatMessage::system("s"), ChatMessage::user("gross sales")];
        let d = ResponseCache::key("openai", &other, &CompletionOptions::default().with_scope("t1"));
        assert_ne!(a, d);
    }
}
