//! OpenAI-compatible chat completions adapter

use crate::config::LlmConfig;
use crate::error::{NlqError, Result};
use crate::llm::adapter::{ChatMessage, CompletionOptions, LlmAdapter, LlmResponse};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct OpenAiAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            default_model: model,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(NlqError::Config("OPENAI_API_KEY is not set".to_string()));
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

    fn build_body(&self, model: &str, messages: &[ChatMessage], options: &CompletionOptions) -> serde_json::Value {
        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": api_messages,
        });

        // Reasoning models take max_completion_tokens and a fixed temperature
        if model.starts_with("o1") || model.starts_with("o3") || model.starts_with("gpt-5") {
            body["max_completion_tokens"] = serde_json::json!(options.max_tokens.max(2_000));
        } else {
            body["temperature"] = serde_json::json!(options.temperature);
            body["max_tokens"] = serde_json::json!(options.max_tokens);
        }
        if options.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait]
impl LlmAdapter for OpenAiAdapter {
    fn provider(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<LlmResponse> {
        let model = options.model.clone().unwrap_or_else(|| self.default_model.clone());
        let body = self.build_body(&model, messages, options);
        let started = Instant::now();

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| NlqError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
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

        if let Some(error) = response_json.get("error") {
            return Err(NlqError::Llm(format!("LLM API error: {}", error)));
        }

        let choice = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| NlqError::Llm("No choices in LLM response".to_string()))?;

        let stop_reason = choice
            .get("finish_reason")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string());
        match stop_reason.as_deref() {
            Some("length") => warn!(model = %model, "LLM response was truncated due to length limit"),
            Some("content_filter") => {
                return Err(NlqError::Llm("LLM response was filtered by content policy".to_string()))
            }
            _ => {}
        }

        let content = choice["message"]["content"]
            .as_str()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| NlqError::Llm("Empty content in LLM response".to_string()))?
            .to_string();

        let usage = &response_json["usage"];
        let tokens_input = usage["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let tokens_output = usage["completion_tokens"].as_u64().unwrap_or(0) as u32;
        let latency_ms = started.elapsed().as_millis() as u64;

        debug!(
            purpose = %options.purpose,
            model = %model,
            tokens_input,
            tokens_output,
            latency_ms,
            "LLM completion finished"
        );

        Ok(LlmResponse {
            content,
            tokens_input,
            tokens_output,
            model: response_json["model"].as_str().unwrap_or(&model).to_string(),
            provider: self.provider().to_string(),
            latency_ms,
            stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_uses_completion_tokens_for_reasoning_models() {
        let adapter = OpenAiAdapter::new("k".into(), "gpt-4o".into(), "http://localhost".into());
        let options = CompletionOptions::for_purpose("intent");
        let messages = vec![ChatMessage::user("hi")];

        let body = adapter.build_body("o1-mini", &messages, &options);
        assert!(body.get("max_completion_tokens").is_some());
        assert!(body.get("temperature").is_none());

        let body = adapter.build_body("gpt-4o", &messages, &options);
        assert_eq!(body["max_tokens"], 1_500);
        assert_eq!(body["response_format"]["type"], "json_object");
    }
}
