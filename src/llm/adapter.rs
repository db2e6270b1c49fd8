//! LLM Adapter Contract
//!
//! The pipeline is provider-agnostic: everything it needs from a model is a
//! single `complete(messages, options)` call returning content plus usage.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Model override; adapters fall back to their configured default
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a JSON object response when it supports that
    pub json_mode: bool,
    /// Allow the response cache to serve and store this call
    pub cacheable: bool,
    /// Extra cache-key context, e.g. the tenant the prompt was built for
    pub cache_scope: Option<String>,
    /// Stage label for logs ("intent", "sql", "narrative")
    pub purpose: String,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.1,
            max_tokens: 1_500,
            json_mode: true,
            cacheable: true,
            cache_scope: None,
            purpose: "completion".to_string(),
        }
    }
}

impl CompletionOptions {
    pub fn for_purpose(purpose: &str) -> Self {
        Self {
            purpose: purpose.to_string(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.cache_scope = Some(scope.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub model: String,
    pub provider: String,
    pub latency_ms: u64,
    pub stop_reason: Option<String>,
}

/// Single-capability provider interface
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Provider name used for circuit breaking and eval records
    fn provider(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<LlmResponse>;
}
