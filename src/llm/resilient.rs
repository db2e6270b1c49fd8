//! Resilient Adapter
//!
//! Decorates any `LlmAdapter` with the process-wide resilience services:
//! fresh cache lookup, request coalescing, circuit breaking, rate limiting
//! with adaptive backoff, and a stale-cache fallback when the provider call
//! fails or the circuit is open.

use crate::cache::response::ResponseCache;
use crate::config::ResilienceConfig;
use crate::error::{NlqError, Result};
use crate::llm::adapter::{ChatMessage, CompletionOptions, LlmAdapter, LlmResponse};
use crate::resilience::{
    AdaptiveBackoff, BackoffSettings, BreakerSettings, CircuitBreakerRegistry, RateLimiter,
    RequestCoalescer,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared state behind every resilient adapter in the process
pub struct ResilienceServices {
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub coalescer: Arc<RequestCoalescer<LlmResponse>>,
    pub response_cache: Arc<ResponseCache>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl ResilienceServices {
    pub fn from_config(config: &ResilienceConfig) -> Self {
        let backoff = Arc::new(AdaptiveBackoff::new(BackoffSettings {
            max_level: config.backoff_max_level,
            decay_interval: Duration::from_secs(config.backoff_decay_secs),
        }));
        Self {
            breakers: Arc::new(CircuitBreakerRegistry::new(BreakerSettings {
                failure_threshold: config.breaker_failure_threshold,
                window: Duration::from_secs(config.breaker_window_secs),
                cooldown: Duration::from_secs(config.breaker_cooldown_secs),
            })),
            coalescer: Arc::new(RequestCoalescer::new()),
            response_cache: Arc::new(ResponseCache::from_config(config)),
            rate_limiter: Arc::new(RateLimiter::new(
                Duration::from_millis(config.rate_limit_interval_ms),
                backoff,
            )),
        }
    }
}

impl Default for ResilienceServices {
    fn default() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }
}

pub struct ResilientAdapter {
    inner: Arc<dyn LlmAdapter>,
    services: Arc<ResilienceServices>,
}

impl ResilientAdapter {
    pub fn new(inner: Arc<dyn LlmAdapter>, services: Arc<ResilienceServices>) -> Self {
        Self { inner, services }
    }

    pub fn services(&self) -> &Arc<ResilienceServices> {
        &self.services
    }

    async fn call_provider(
        &self,
        key: &str,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<LlmResponse> {
        let provider = self.inner.provider();
        let permit = self.services.breakers.try_acquire(provider)?;
        self.services.rate_limiter.acquire().await;

        match self.inner.complete(messages, options).await {
            Ok(response) => {
                permit.success();
                if options.cacheable {
                    self.services.response_cache.put(key, response.clone());
                }
                Ok(response)
            }
            Err(err) => {
                if matches!(err, NlqError::RateLimited(_)) {
                    self.services.rate_limiter.backoff().raise();
                }
                if err.is_transport() {
                    permit.failure();
                } else {
                    permit.success();
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl LlmAdapter for ResilientAdapter {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<LlmResponse> {
        let key = ResponseCache::key(self.inner.provider(), messages, options);

        if options.cacheable {
            if let Some(cached) = self.services.response_cache.get(&key).fresh() {
                debug!(purpose = %options.purpose, "Serving LLM response from cache");
                return Ok(cached);
            }
        }

        let result = self
            .services
            .coalescer
            .run(&key, || self.call_provider(&key, messages, options))
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(err) if options.cacheable => match self.services.response_cache.get(&key).usable() {
                Some(stale) => {
                    warn!(
                        purpose = %options.purpose,
                        error = %err,
                        "LLM call failed, serving stale cached response"
                    );
                    Ok(stale)
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }
}
