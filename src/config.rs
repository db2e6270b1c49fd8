//! Configuration
//!
//! Typed configuration for the pipeline, loaded from the environment (and an
//! optional `.env` file). Every setting has a default so a bare environment
//! with only an API key is enough to run the metrics path.

use crate::error::{NlqError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which provider adapter to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
}

impl FromStr for LlmProvider {
    type Err = NlqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "open_ai" => Ok(LlmProvider::OpenAi),
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            other => Err(NlqError::Config(format!("Unknown LLM provider '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub base_url: String,
    pub intent_model: String,
    pub sql_model: String,
    pub narrative_model: String,
    pub request_timeout_secs: u64,
    pub max_tokens: u32,
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(skip_serializing)]
    pub url: Option<String>,
    pub max_connections: u32,
    /// Schemas exposed to SQL mode
    pub schemas: Vec<String>,
    /// Tables never shown to the SQL generator
    pub excluded_tables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Hard row cap applied to every executed statement
    pub max_rows: usize,
    pub query_timeout_ms: u64,
    pub sql_max_retries: u8,
    /// Whether an empty metrics result triggers SQL mode
    pub fallback_on_empty: bool,
    pub sql_mode_enabled: bool,
    /// Token budget for assembled prompts (estimated)
    pub prompt_token_budget: usize,
    /// Rows embedded in the narrative prompt
    pub narrative_max_rows: usize,
    pub eval_timeout_ms: u64,
    pub mask_pii: bool,
}

impl PipelineConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn eval_timeout(&self) -> Duration {
        Duration::from_millis(self.eval_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rows: 1_000,
            query_timeout_ms: 15_000,
            sql_max_retries: 2,
            fallback_on_empty: true,
            sql_mode_enabled: true,
            prompt_token_budget: 6_000,
            narrative_max_rows: 50,
            eval_timeout_ms: 2_000,
            mask_pii: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub breaker_failure_threshold: u32,
    pub breaker_window_secs: u64,
    pub breaker_cooldown_secs: u64,
    pub response_cache_ttl_secs: u64,
    pub response_cache_stale_secs: u64,
    pub result_cache_ttl_secs: u64,
    pub result_cache_stale_secs: u64,
    pub cache_max_entries: usize,
    pub rate_limit_interval_ms: u64,
    pub backoff_max_level: u32,
    pub backoff_decay_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            breaker_failure_threshold: 5,
            breaker_window_secs: 60,
            breaker_cooldown_secs: 30,
            response_cache_ttl_secs: 300,
            response_cache_stale_secs: 3_600,
            result_cache_ttl_secs: 120,
            result_cache_stale_secs: 1_800,
            cache_max_entries: 2_000,
            rate_limit_interval_ms: 50,
            backoff_max_level: 6,
            backoff_decay_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
    pub resilience: ResilienceConfig,
    /// JSON registry document (metrics, dimensions, lenses)
    pub registry_path: Option<PathBuf>,
    /// Append-only JSONL file for evaluation records
    pub eval_log_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from `NLQ_*` variables and provider credentials
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let provider: LlmProvider = env_or("NLQ_LLM_PROVIDER", LlmProvider::OpenAi)?;
        let (key_var, default_url, default_model) = match provider {
            LlmProvider::OpenAi => ("OPENAI_API_KEY", "https://api.openai.com/v1", "gpt-4o-mini"),
            LlmProvider::Anthropic => (
                "ANTHROPIC_API_KEY",
                "https://api.anthropic.com/v1",
                "claude-3-5-haiku-latest",
            ),
        };
        let api_key = std::env::var(key_var).unwrap_or_default();
        let model = env_string("NLQ_LLM_MODEL", default_model);

        let llm = LlmConfig {
            provider,
            api_key,
            base_url: env_string("NLQ_LLM_BASE_URL", default_url),
            intent_model: env_string("NLQ_INTENT_MODEL", &model),
            sql_model: env_string("NLQ_SQL_MODEL", &model),
            narrative_model: env_string("NLQ_NARRATIVE_MODEL", &model),
            request_timeout_secs: env_or("NLQ_LLM_TIMEOUT_SECS", 60)?,
            max_tokens: env_or("NLQ_LLM_MAX_TOKENS", 1_500)?,
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            max_connections: env_or("NLQ_DB_MAX_CONNECTIONS", 5)?,
            schemas: env_list("NLQ_DB_SCHEMAS", &["public"]),
            excluded_tables: env_list("NLQ_DB_EXCLUDED_TABLES", &[]),
        };

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            max_rows: env_or("NLQ_MAX_ROWS", defaults.max_rows)?,
            query_timeout_ms: env_or("NLQ_QUERY_TIMEOUT_MS", defaults.query_timeout_ms)?,
            sql_max_retries: env_or("NLQ_SQL_MAX_RETRIES", defaults.sql_max_retries)?,
            fallback_on_empty: env_or("NLQ_FALLBACK_ON_EMPTY", defaults.fallback_on_empty)?,
            sql_mode_enabled: env_or("NLQ_SQL_MODE", defaults.sql_mode_enabled)?,
            prompt_token_budget: env_or("NLQ_PROMPT_TOKEN_BUDGET", defaults.prompt_token_budget)?,
            narrative_max_rows: env_or("NLQ_NARRATIVE_MAX_ROWS", defaults.narrative_max_rows)?,
            eval_timeout_ms: env_or("NLQ_EVAL_TIMEOUT_MS", defaults.eval_timeout_ms)?,
            mask_pii: env_or("NLQ_MASK_PII", defaults.mask_pii)?,
        };

        let r = ResilienceConfig::default();
        let resilience = ResilienceConfig {
            breaker_failure_threshold: env_or("NLQ_BREAKER_THRESHOLD", r.breaker_failure_threshold)?,
            breaker_window_secs: env_or("NLQ_BREAKER_WINDOW_SECS", r.breaker_window_secs)?,
            breaker_cooldown_secs: env_or("NLQ_BREAKER_COOLDOWN_SECS", r.breaker_cooldown_secs)?,
            response_cache_ttl_secs: env_or("NLQ_RESPONSE_CACHE_TTL_SECS", r.response_cache_ttl_secs)?,
            response_cache_stale_secs: env_or("NLQ_RESPONSE_CACHE_STALE_SECS", r.response_cache_stale_secs)?,
            result_cache_ttl_secs: env_or("NLQ_RESULT_CACHE_TTL_SECS", r.result_cache_ttl_secs)?,
            result_cache_stale_secs: env_or("NLQ_RESULT_CACHE_STALE_SECS", r.result_cache_stale_secs)?,
            cache_max_entries: env_or("NLQ_CACHE_MAX_ENTRIES", r.cache_max_entries)?,
            rate_limit_interval_ms: env_or("NLQ_RATE_LIMIT_INTERVAL_MS", r.rate_limit_interval_ms)?,
            backoff_max_level: env_or("NLQ_BACKOFF_MAX_LEVEL", r.backoff_max_level)?,
            backoff_decay_secs: env_or("NLQ_BACKOFF_DECAY_SECS", r.backoff_decay_secs)?,
        };

        Ok(Self {
            llm,
            database,
            pipeline,
            resilience,
            registry_path: std::env::var("NLQ_REGISTRY_PATH").ok().map(PathBuf::from),
            eval_log_path: std::env::var("NLQ_EVAL_LOG").ok().map(PathBuf::from),
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| NlqError::Config(format!("Invalid value for {}: {} ({})", key, raw, e))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("OpenAI".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
        assert_eq!("claude".parse::<LlmProvider>().unwrap(), LlmProvider::Anthropic);
        assert!("mystery".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        std::env::set_var("NLQ_TEST_GARBAGE_ROWS", "lots");
        let parsed: Result<usize> = env_or("NLQ_TEST_GARBAGE_ROWS", 10);
        assert!(matches!(parsed, Err(NlqError::Config(_))));
        std::env::remove_var("NLQ_TEST_GARBAGE_ROWS");
    }

    #[test]
    fn test_pipeline_defaults_fall_back_on_empty() {
        let defaults = PipelineConfig::default();
        assert!(defaults.fallback_on_empty);
        assert_eq!(defaults.query_timeout(), Duration::from_secs(15));
    }
}
