//! Gemini LLM service adapter
//!
//! Implements LlmPort against the generativelanguage REST API. Serves as the
//! formatter fallback and the preferred provider for dialogue formatting.

use crate::error::{AppError, Result};
use crate::ports::llm::{LlmConfig, LlmPort};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Gemini service implementation
pub struct GeminiService {
    client: Client,
    api_key: String,
}

impl GeminiService {
    /// Create a new Gemini service with the given API key
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, api_key }
    }
}

#[async_trait]
impl LlmPort for GeminiService {
    async fn generate(&self, prompt: &str, config: &LlmConfig) -> Result<String> {
        let model = if config.model.is_empty() {
            DEFAULT_MODEL
        } else {
            &config.model
        };
        log::info!(
            "Calling Gemini {} with {} prompt chars",
            model,
            prompt.chars().count()
        );

        let request_body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: config.temperature,
                top_p: Some(0.95),
                max_output_tokens: config.max_tokens,
            },
        };

        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_API_BASE, model, self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Gemini request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Llm(format!(
                "Gemini API error {}: {}",
                status,
                error_text.chars().take(200).collect::<String>()
            )));
        }

        let data: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse Gemini response: {e}")))?;

        let text = data
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Llm("Gemini response carried no text".to_string()))?;

        Ok(text)
    }

    fn provider_name(&self) -> &str {
        "gemini"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ===== API Request/Response Types =====

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "topP", skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_service_creation() {
        let service = GeminiService::new("test_api_key".to_string());
        assert_eq!(service.provider_name(), "gemini");
        assert!(service.is_configured());
    }

    #[test]
    fn test_gemini_service_not_configured() {
        let service = GeminiService::new(String::new());
        assert!(!service.is_configured());
    }

    #[test]
    fn test_response_parse() {
        let json = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "Отформатировано."}]}}
            ]
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.candidates[0].content.parts[0].text, "Отформатировано.");
    }

    #[test]
    fn test_empty_response_parse() {
        let parsed: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.candidates.is_empty());
    }
}
