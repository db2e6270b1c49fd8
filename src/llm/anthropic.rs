//! Anthropic messages API adapter

use crate::config::LlmConfig;
use crate::error::{NlqError, Result};
use crate::llm::adapter::{ChatMessage, ChatRole, CompletionOptions, LlmAdapter, LlmResponse};
use async_trait::async_trait;
use std::time::Instant;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl AnthropicAdapter {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(NlqError::Config("ANTHROPIC_API_KEY is not set".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| NlqError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_model: config.intent_model.clone(),
        })
    }

    /// System messages go in the top-level `system` field
    fn build_body(model: &str, messages: &[ChatMessage], options: &CompletionOptions) -> serde_json::Value {
        let system = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let turns: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "messages": turns,
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system);
        }
        body
    }
}

#[async_trait]
impl LlmAdapter for AnthropicAdapter {
    fn provider(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<LlmResponse> {
        let model = options.model.clone().unwrap_or_else(|| self.default_model.clone());
        let body = Self::build_body(&model, messages, options);
        let started = Instant::now();

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| NlqError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 529 {
            let error_text = response.text().await.unwrap_or_default();
            return Err(NlqError::RateLimited(error_text));
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NlqError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NlqError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|c| !c.is_empty())
            .ok_or_else(|| NlqError::Llm("Empty content in LLM response".to_string()))?;

        let tokens_input = response_json["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
        let tokens_output = response_json["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;
        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(purpose = %options.purpose, model = %model, latency_ms, "LLM completion finished");

        Ok(LlmResponse {
            content,
            tokens_input,
            tokens_output,
            model: response_json["model"].as_str().unwrap_or(&model).to_string(),
            provider: self.provider().to_string(),
            latency_ms,
            stop_reason: response_json["stop_reason"].as_str().map(|s| s.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_messages_are_lifted() {
        let messages = vec![
            ChatMessage::system("You plan queries."),
            ChatMessage::user("net sales?"),
        ];
        let body = AnthropicAdapter::build_body("claude", &messages, &CompletionOptions::default());
        assert_eq!(body["system"], "You plan queries.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }
}
