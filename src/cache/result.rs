//! Query result cache
//!
//! Fingerprint = tenant + SQL text + bound parameters. Two tenants never
//! share an entry even when the SQL is identical.

use crate::cache::stale::{CacheLookup, CacheStats, StaleCache};
use crate::config::ResilienceConfig;
use crate::execution::result::QueryResult;
use sha2::{Digest, Sha256};
use std::time::Duration;

pub struct ResultCache {
    inner: StaleCache<QueryResult>,
}

impl ResultCache {
    pub fn new(fresh_ttl: Duration, stale_ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: StaleCache::new(fresh_ttl, stale_ttl, max_entries),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(
            Duration::from_secs(config.result_cache_ttl_secs),
            Duration::from_secs(config.result_cache_stale_secs),
            config.cache_max_entries,
        )
    }

    pub fn fingerprint(tenant_id: &str, sql: &str, params: &[serde_json::Value]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tenant_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(sql.trim().as_bytes());
        for param in params {
            hasher.update([0u8]);
            hasher.update(param.to_string().as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> CacheLookup<QueryResult> {
        self.inner.get(key)
    }

    pub fn put(&self, key: &str, result: QueryResult) {
        self.inner.put(key, result);
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_isolates_tenants() {
        let sql = "SELECT 1 WHERE tenant_id = $1";
        let a = ResultCache::fingerprint("t1", sql, &[json!("t1")]);
        let b = ResultCache::fingerprint("t2", sql, &[json!("t1")]);
        assert_ne!(a, b);
        assert_eq!(a, ResultCache::fingerprint("t1", sql, &[json!("t1")]));
    }

    #[test]
    fn test_fingerprint_distinguishes_params() {
        let sql = "SELECT 1 WHERE x = $2";
        assert_ne!(
            ResultCache::fingerprint("t", sql, &[json!(1)]),
            ResultCache::fingerprint("t", sql, &[json!("1")])
        );
    }
}
