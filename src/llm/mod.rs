//! LLM integration: adapter contract, provider adapters and the resilient
//! decorator

pub mod adapter;
pub mod anthropic;
pub mod json;
pub mod openai;
pub mod resilient;

pub use adapter::*;
pub use anthropic::AnthropicAdapter;
pub use json::*;
pub use openai::OpenAiAdapter;
pub use resilient::*;

use crate::config::{LlmConfig, LlmProvider};
use crate::error::Result;
use std::sync::Arc;

/// Build the configured provider adapter wrapped in the resilience layer
pub fn build_adapter(
    config: &LlmConfig,
    services: Arc<ResilienceServices>,
) -> Result<Arc<dyn LlmAdapter>> {
    let provider: Arc<dyn LlmAdapter> = match config.provider {
        LlmProvider::OpenAi => Arc::new(OpenAiAdapter::from_config(config)?),
        LlmProvider::Anthropic => Arc::new(AnthropicAdapter::from_config(config)?),
    };
    Ok(Arc::new(ResilientAdapter::new(provider, services)))
}
