//! Qwen LLM service adapter
//!
//! Implements LlmPort against the DashScope text-generation REST API.
//! The response text arrives in one of several nested shapes depending on
//! the result_format negotiated server-side; the parser tolerates all of
//! the observed ones.

use crate::error::{AppError, Result};
use crate::ports::llm::{LlmConfig, LlmPort};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const DASHSCOPE_TEXT_API: &str =
    "https://dashscope-intl.aliyuncs.com/api/v1/services/aigc/text-generation/generation";

const DEFAULT_MODEL: &str = "qwen-turbo";

/// Qwen service implementation
pub struct QwenService {
    client: Client,
    api_key: String,
}

impl QwenService {
    /// Create a new Qwen service with the given API key
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, api_key }
    }
}

#[async_trait]
impl LlmPort for QwenService {
    async fn generate(&self, prompt: &str, config: &LlmConfig) -> Result<String> {
        let model = if config.model.is_empty() {
            DEFAULT_MODEL
        } else {
            &config.model
        };
        log::info!(
            "Calling Qwen text generation with model {}, {} prompt chars",
            model,
            prompt.chars().count()
        );

        let request_body = GenerationRequest {
            model: model.to_string(),
            input: GenerationInput {
                messages: vec![Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                }],
            },
            parameters: GenerationParameters {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            },
        };

        let response = self
            .client
            .post(DASHSCOPE_TEXT_API)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Qwen request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Llm(format!(
                "Qwen API error {}: {}",
                status,
                error_text.chars().take(200).collect::<String>()
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse Qwen response: {e}")))?;

        let text = extract_output_text(&data)
            .ok_or_else(|| AppError::Llm("Qwen response carried no text".to_string()))?;

        Ok(text)
    }

    fn provider_name(&self) -> &str {
        "qwen"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Pull the generated text out of whichever shape the API used:
/// `output.text`, `output.choices[0].message.content` (string), or
/// `output.choices[0].message.content[0].text`.
fn extract_output_text(data: &Value) -> Option<String> {
    let output = data.get("output")?;

    if let Some(text) = output.get("text").and_then(Value::as_str) {
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }

    let content = output
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?;

    match content {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Array(parts) => parts
            .first()?
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string()),
        _ => None,
    }
}

// ===== API Request Types =====

#[derive(Debug, Serialize)]
struct GenerationRequest {
    model: String,
    input: GenerationInput,
    parameters: GenerationParameters,
}

#[derive(Debug, Serialize)]
struct GenerationInput {
    messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct GenerationParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_qwen_service_creation() {
        let service = QwenService::new("test_api_key".to_string());
        assert_eq!(service.provider_name(), "qwen");
        assert!(service.is_configured());
    }

    #[test]
    fn test_qwen_service_not_configured() {
        let service = QwenService::new(String::new());
        assert!(!service.is_configured());
    }

    #[test]
    fn test_extract_output_text_shape() {
        let data = json!({"output": {"text": "результат"}});
        assert_eq!(extract_output_text(&data).unwrap(), "результат");
    }

    #[test]
    fn test_extract_choices_string_shape() {
        let data = json!({
            "output": {"choices": [{"message": {"content": "из choices"}}]}
        });
        assert_eq!(extract_output_text(&data).unwrap(), "из choices");
    }

    #[test]
    fn test_extract_choices_array_shape() {
        let data = json!({
            "output": {"choices": [{"message": {"content": [{"text": "из списка"}]}}]}
        });
        assert_eq!(extract_output_text(&data).unwrap(), "из списка");
    }

    #[test]
    fn test_extract_missing_text() {
        assert!(extract_output_text(&json!({"output": {}})).is_none());
        assert!(extract_output_text(&json!({})).is_none());
    }
}
