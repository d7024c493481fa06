//! DashScope asynchronous transcription adapter
//!
//! Implements AsyncTranscriptionPort via the submit-poll-fetch task API:
//! 1. Submit a transcription task referencing the audio by URL
//! 2. Poll the task id until it reaches a terminal status
//! 3. Fetch the result document from the URL embedded in the completion
//!
//! The speaker pass runs a diarization-enabled model whose times are
//! authoritative; the text pass runs the higher-accuracy model with the
//! language pinned.

use crate::domain::models::Segment;
use crate::error::{AppError, Result};
use crate::ports::asr::{AsyncTranscriptionPort, PassResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DASHSCOPE_API_BASE: &str = "https://dashscope-intl.aliyuncs.com/api/v1";

/// Diarization-enabled model for the speaker pass
const SPEAKER_MODEL: &str = "paraformer-v2";
/// Higher-accuracy model for the text pass
const TEXT_MODEL: &str = "fun-asr";

const POLL_INTERVAL_MS: u64 = 3000;
// The per-pass deadline is enforced by the engine; this cap only bounds a
// poll loop the engine forgot to cancel
const MAX_POLL_ATTEMPTS: u32 = 100;

/// DashScope async transcription service implementation
pub struct DashScopeTranscription {
    client: Client,
    api_key: String,
}

impl DashScopeTranscription {
    /// Create a new async transcription service with the given API key
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, api_key }
    }

    /// Submit a transcription task; returns the task id
    async fn submit_task(&self, model: &str, audio_url: &str, language: Option<&str>) -> Result<String> {
        let mut parameters = json!({});
        if model == SPEAKER_MODEL {
            parameters = json!({"diarization_enabled": true});
        }
        if let Some(language) = language {
            parameters["language_hints"] = json!([language]);
        }

        let payload = json!({
            "model": model,
            "input": {"file_urls": [audio_url]},
            "parameters": parameters
        });

        let response = self
            .client
            .post(format!("{DASHSCOPE_API_BASE}/services/audio/asr/transcription"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-DashScope-Async", "enable")
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::AsrProvider(format!("Submit request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::AsrProvider(format!(
                "Submit failed {status}: {}",
                error_text.chars().take(200).collect::<String>()
            )));
        }

        let submit: SubmitResponse = response
            .json()
            .await
            .map_err(|e| AppError::AsrProvider(format!("Failed to parse submit response: {e}")))?;

        log::info!("Transcription task submitted: {} ({})", submit.output.task_id, model);
        Ok(submit.output.task_id)
    }

    /// Poll until the task is terminal; returns the result-document URL
    async fn poll_task(&self, task_id: &str) -> Result<String> {
        for attempt in 1..=MAX_POLL_ATTEMPTS {
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;

            let response = self
                .client
                .get(format!("{DASHSCOPE_API_BASE}/tasks/{task_id}"))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .send()
                .await
                .map_err(|e| AppError::AsrProvider(format!("Poll request failed: {e}")))?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                return Err(AppError::AsrProvider(format!(
                    "Poll failed {status}: {}",
                    error_text.chars().take(200).collect::<String>()
                )));
            }

            let task: TaskResponse = response
                .json()
                .await
                .map_err(|e| AppError::AsrProvider(format!("Failed to parse poll response: {e}")))?;

            match task.output.task_status.as_str() {
                "SUCCEEDED" => {
                    let url = task
                        .output
                        .results
                        .into_iter()
                        .next()
                        .and_then(|r| r.transcription_url)
                        .ok_or_else(|| {
                            AppError::AsrProvider("Task succeeded without a result URL".to_string())
                        })?;
                    return Ok(url);
                }
                "FAILED" => {
                    return Err(AppError::AsrProvider(format!(
                        "Transcription task failed: {}",
                        task.output.message.unwrap_or_default()
                    )));
                }
                status => {
                    log::debug!(
                        "Task {} status {} (attempt {}/{})",
                        task_id,
                        status,
                        attempt,
                        MAX_POLL_ATTEMPTS
                    );
                }
            }
        }

        Err(AppError::AsrTimeout)
    }

    /// Fetch and parse the result document
    async fn fetch_result(&self, transcription_url: &str) -> Result<PassResult> {
        let response = self
            .client
            .get(transcription_url)
            .send()
            .await
            .map_err(|e| AppError::AsrProvider(format!("Result fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::AsrProvider(format!(
                "Result fetch failed with {}",
                response.status()
            )));
        }

        let document: TranscriptionDocument = response
            .json()
            .await
            .map_err(|e| AppError::AsrProvider(format!("Failed to parse result document: {e}")))?;

        Ok(PassResult {
            segments: document_segments(document),
        })
    }

    async fn run_pass(&self, model: &str, audio_url: &str, language: Option<&str>) -> Result<PassResult> {
        let task_id = self.submit_task(model, audio_url, language).await?;
        let result_url = self.poll_task(&task_id).await?;
        let result = self.fetch_result(&result_url).await?;
        log::info!(
            "Pass {} complete: {} segments",
            model,
            result.segments.len()
        );
        Ok(result)
    }
}

#[async_trait]
impl AsyncTranscriptionPort for DashScopeTranscription {
    async fn speaker_pass(&self, audio_url: &str) -> Result<PassResult> {
        self.run_pass(SPEAKER_MODEL, audio_url, None).await
    }

    async fn text_pass(&self, audio_url: &str, language: &str) -> Result<PassResult> {
        self.run_pass(TEXT_MODEL, audio_url, Some(language)).await
    }

    fn provider_name(&self) -> &str {
        "dashscope-async"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Flatten a result document into timeline segments.
///
/// Word timings are used when present (finer attribution during the merge),
/// otherwise whole sentences are emitted.
fn document_segments(document: TranscriptionDocument) -> Vec<Segment> {
    let mut segments = Vec::new();
    let Some(transcript) = document.transcripts.into_iter().next() else {
        return segments;
    };

    for sentence in transcript.sentences {
        let speaker_id = sentence.speaker_id.unwrap_or(0);
        if sentence.words.is_empty() {
            if !sentence.text.trim().is_empty() {
                segments.push(Segment::new(
                    speaker_id,
                    sentence.text.trim(),
                    sentence.begin_time,
                    sentence.end_time,
                ));
            }
            continue;
        }
        for word in sentence.words {
            let text = format!("{}{}", word.text.trim(), word.punctuation.trim());
            if text.is_empty() {
                continue;
            }
            segments.push(Segment::new(
                speaker_id,
                &text,
                word.begin_time,
                word.end_time,
            ));
        }
    }

    segments
}

// ===== API Response Types =====

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    output: SubmitOutput,
}

#[derive(Debug, Deserialize)]
struct SubmitOutput {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    output: TaskOutput,
}

#[derive(Debug, Deserialize)]
struct TaskOutput {
    task_status: String,
    #[serde(default)]
    results: Vec<TaskResult>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    #[serde(default)]
    transcription_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionDocument {
    #[serde(default)]
    transcripts: Vec<Transcript>,
}

#[derive(Debug, Deserialize)]
struct Transcript {
    #[serde(default)]
    sentences: Vec<Sentence>,
}

#[derive(Debug, Deserialize)]
struct Sentence {
    #[serde(default)]
    text: String,
    #[serde(default)]
    begin_time: i64,
    #[serde(default)]
    end_time: i64,
    #[serde(default)]
    speaker_id: Option<u32>,
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Debug, Deserialize)]
struct Word {
    #[serde(default)]
    text: String,
    #[serde(default)]
    punctuation: String,
    #[serde(default)]
    begin_time: i64,
    #[serde(default)]
    end_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_creation() {
        let service = DashScopeTranscription::new("test_api_key".to_string());
        assert_eq!(service.provider_name(), "dashscope-async");
        assert!(service.is_configured());
    }

    #[test]
    fn test_sentence_level_document() {
        let json = r#"{
            "transcripts": [{
                "sentences": [
                    {"text": "Первое предложение.", "begin_time": 0, "end_time": 4000, "speaker_id": 1},
                    {"text": "Второе.", "begin_time": 4000, "end_time": 6000, "speaker_id": 2}
                ]
            }]
        }"#;
        let document: TranscriptionDocument = serde_json::from_str(json).unwrap();
        let segments = document_segments(document);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].speaker_id, 1);
        assert_eq!(segments[0].text, "Первое предложение.");
        assert_eq!(segments[1].start_ms, 4000);
    }

    #[test]
    fn test_word_level_document() {
        let json = r#"{
            "transcripts": [{
                "sentences": [{
                    "text": "привет мир",
                    "begin_time": 0,
                    "end_time": 2000,
                    "words": [
                        {"text": "привет", "punctuation": ",", "begin_time": 0, "end_time": 900},
                        {"text": "мир", "punctuation": ".", "begin_time": 900, "end_time": 2000}
                    ]
                }]
            }]
        }"#;
        let document: TranscriptionDocument = serde_json::from_str(json).unwrap();
        let segments = document_segments(document);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "привет,");
        assert_eq!(segments[1].text, "мир.");
        assert_eq!(segments[1].end_ms, 2000);
    }

    #[test]
    fn test_empty_document() {
        let document: TranscriptionDocument = serde_json::from_str("{}").unwrap();
        assert!(document_segments(document).is_empty());
    }

    #[test]
    fn test_missing_speaker_defaults_to_zero() {
        let json = r#"{
            "transcripts": [{
                "sentences": [{"text": "без спикера", "begin_time": 0, "end_time": 1000}]
            }]
        }"#;
        let document: TranscriptionDocument = serde_json::from_str(json).unwrap();
        let segments = document_segments(document);
        assert_eq!(segments[0].speaker_id, 0);
    }
}
