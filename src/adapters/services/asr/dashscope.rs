//! DashScope single-shot ASR adapter
//!
//! Implements AsrPort with one synchronous call: the audio travels inline as
//! a base64 data URI in the multimodal-generation request body. The response
//! text arrives in one of three observed shapes; all are tolerated.

use crate::error::{AppError, Result};
use crate::ports::asr::AsrPort;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

const DASHSCOPE_MULTIMODAL_API: &str =
    "https://dashscope-intl.aliyuncs.com/api/v1/services/aigc/multimodal-generation/generation";

const ASR_MODEL: &str = "qwen3-asr-flash";

/// DashScope ASR service implementation
pub struct DashScopeAsr {
    client: Client,
    api_key: String,
}

impl DashScopeAsr {
    /// Create a new DashScope ASR service with the given API key
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, api_key }
    }
}

fn mime_for_extension(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "wav" => "audio/wav",
        "ogg" | "oga" => "audio/ogg",
        "m4a" => "audio/mp4",
        "flac" => "audio/flac",
        "webm" => "audio/webm",
        _ => "audio/mpeg",
    }
}

#[async_trait]
impl AsrPort for DashScopeAsr {
    async fn transcribe_file(&self, audio_path: &Path, _language: &str) -> Result<String> {
        let bytes = tokio::fs::read(audio_path)
            .await
            .map_err(|e| AppError::AsrProvider(format!("Failed to read audio file: {e}")))?;
        log::info!(
            "Starting DashScope ASR for {} ({} bytes)",
            audio_path.display(),
            bytes.len()
        );

        let data_uri = format!(
            "data:{};base64,{}",
            mime_for_extension(audio_path),
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        );

        let payload = json!({
            "model": ASR_MODEL,
            "input": {
                "messages": [
                    {"role": "system", "content": [{"text": ""}]},
                    {"role": "user", "content": [{"audio": data_uri}]}
                ]
            },
            "parameters": {
                "result_format": "message",
                "asr_options": {"enable_itn": true}
            }
        });

        let response = self
            .client
            .post(DASHSCOPE_MULTIMODAL_API)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::AsrProvider(format!("ASR request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body: Value = response.json().await.unwrap_or_default();
            let code = body
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(AppError::AsrProvider(format!(
                "ASR API error {status}: {code} {message}"
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| AppError::AsrProvider(format!("Failed to parse ASR response: {e}")))?;

        let text = extract_transcript(&data).unwrap_or_default();
        let text = text.trim().to_string();
        log::info!("DashScope ASR returned {} chars", text.chars().count());

        if text.chars().count() < 3 {
            return Err(AppError::TranscriptionEmpty);
        }

        Ok(text)
    }

    fn provider_name(&self) -> &str {
        "dashscope"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Extract the transcript from whichever shape the API used:
/// `output.choices[0].message.content[0].text`, string `content`, or
/// `output.text`.
fn extract_transcript(data: &Value) -> Option<String> {
    let output = data.get("output")?;

    if let Some(content) = output
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
    {
        match content {
            Value::Array(parts) => {
                if let Some(text) = parts
                    .first()
                    .and_then(|p| p.get("text"))
                    .and_then(Value::as_str)
                {
                    if !text.is_empty() {
                        return Some(text.to_string());
                    }
                }
            }
            Value::String(text) if !text.is_empty() => return Some(text.clone()),
            _ => {}
        }
    }

    output
        .get("text")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dashscope_service_creation() {
        let service = DashScopeAsr::new("test_api_key".to_string());
        assert_eq!(service.provider_name(), "dashscope");
        assert!(service.is_configured());
    }

    #[test]
    fn test_dashscope_service_not_configured() {
        let service = DashScopeAsr::new(String::new());
        assert!(!service.is_configured());
    }

    #[test]
    fn test_mime_detection() {
        assert_eq!(mime_for_extension(Path::new("a.mp3")), "audio/mpeg");
        assert_eq!(mime_for_extension(Path::new("a.oga")), "audio/ogg");
        assert_eq!(mime_for_extension(Path::new("a.WAV")), "audio/wav");
        assert_eq!(mime_for_extension(Path::new("noext")), "audio/mpeg");
    }

    #[test]
    fn test_extract_content_array_shape() {
        let data = json!({
            "output": {"choices": [{"message": {"content": [{"text": "привет мир"}]}}]}
        });
        assert_eq!(extract_transcript(&data).unwrap(), "привет мир");
    }

    #[test]
    fn test_extract_content_string_shape() {
        let data = json!({
            "output": {"choices": [{"message": {"content": "строка напрямую"}}]}
        });
        assert_eq!(extract_transcript(&data).unwrap(), "строка напрямую");
    }

    #[test]
    fn test_extract_output_text_shape() {
        let data = json!({"output": {"text": "просто текст"}});
        assert_eq!(extract_transcript(&data).unwrap(), "просто текст");
    }

    #[test]
    fn test_extract_empty() {
        assert!(extract_transcript(&json!({"output": {}})).is_none());
    }
}
