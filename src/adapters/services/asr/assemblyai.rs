//! AssemblyAI diarization adapter
//!
//! One-call alternate to the two-pass protocol: returns speaker-labeled
//! utterances directly. API flow:
//! 1. Upload audio file
//! 2. Submit transcription request with diarization
//! 3. Poll for completion
//! 4. Parse utterances with speaker labels

use crate::domain::models::Segment;
use crate::error::{AppError, Result};
use crate::ports::asr::DiarizationPort;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ASSEMBLYAI_API_BASE: &str = "https://api.assemblyai.com/v2";
const POLL_INTERVAL_MS: u64 = 3000;
const MAX_POLL_ATTEMPTS: u32 = 90;

/// AssemblyAI service implementation
pub struct AssemblyAiService {
    client: Client,
    api_key: String,
}

impl AssemblyAiService {
    /// Create a new AssemblyAI service with the given API key
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, api_key }
    }

    /// Upload the audio file; returns the provider-side URL
    async fn upload_file(&self, audio_path: &Path) -> Result<String> {
        log::info!("Uploading audio to AssemblyAI: {}", audio_path.display());

        let buffer = tokio::fs::read(audio_path)
            .await
            .map_err(|e| AppError::AsrProvider(format!("Failed to read audio file: {e}")))?;

        let response = self
            .client
            .post(format!("{ASSEMBLYAI_API_BASE}/upload"))
            .header("authorization", &self.api_key)
            .header("content-type", "application/octet-stream")
            .body(buffer)
            .send()
            .await
            .map_err(|e| AppError::AsrProvider(format!("Upload request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::AsrProvider(format!("Upload failed: {error_text}")));
        }

        let upload: UploadResponse = response
            .json()
            .await
            .map_err(|e| AppError::AsrProvider(format!("Failed to parse upload response: {e}")))?;

        Ok(upload.upload_url)
    }

    async fn submit_transcription(&self, audio_url: &str, language: &str) -> Result<String> {
        let request_body = TranscriptionRequest {
            audio_url: audio_url.to_string(),
            speaker_labels: true,
            language_code: Some(language.to_string()),
        };

        let response = self
            .client
            .post(format!("{ASSEMBLYAI_API_BASE}/transcript"))
            .header("authorization", &self.api_key)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AppError::AsrProvider(format!("Submit request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::AsrProvider(format!("Submit failed: {error_text}")));
        }

        let submit: TranscriptResponse = response
            .json()
            .await
            .map_err(|e| AppError::AsrProvider(format!("Failed to parse submit response: {e}")))?;

        log::info!("AssemblyAI transcription submitted: {}", submit.id);
        Ok(submit.id)
    }

    async fn poll_transcription(&self, transcript_id: &str) -> Result<TranscriptResponse> {
        for attempt in 1..=MAX_POLL_ATTEMPTS {
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;

            let response = self
                .client
                .get(format!("{ASSEMBLYAI_API_BASE}/transcript/{transcript_id}"))
                .header("authorization", &self.api_key)
                .send()
                .await
                .map_err(|e| AppError::AsrProvider(format!("Poll request failed: {e}")))?;

            if !response.status().is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(AppError::AsrProvider(format!("Poll failed: {error_text}")));
            }

            let transcript: TranscriptResponse = response
                .json()
                .await
                .map_err(|e| AppError::AsrProvider(format!("Failed to parse poll response: {e}")))?;

            match transcript.status.as_str() {
                "completed" => return Ok(transcript),
                "error" => {
                    return Err(AppError::AsrProvider(format!(
                        "Transcription failed: {}",
                        transcript.error.unwrap_or_default()
                    )));
                }
                status => {
                    log::debug!(
                        "AssemblyAI status {} (attempt {}/{})",
                        status,
                        attempt,
                        MAX_POLL_ATTEMPTS
                    );
                }
            }
        }

        Err(AppError::AsrTimeout)
    }
}

#[async_trait]
impl DiarizationPort for AssemblyAiService {
    async fn diarize_file(&self, audio_path: &Path, language: &str) -> Result<Vec<Segment>> {
        let audio_url = self.upload_file(audio_path).await?;
        let transcript_id = self.submit_transcription(&audio_url, language).await?;
        let transcript = self.poll_transcription(&transcript_id).await?;

        let segments = utterance_segments(transcript.utterances.unwrap_or_default());
        log::info!(
            "AssemblyAI diarization complete: {} segments",
            segments.len()
        );
        Ok(segments)
    }

    fn provider_name(&self) -> &str {
        "assemblyai"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Convert provider utterances (speaker labels "A", "B", …) into segments.
/// Label order of first appearance becomes the raw speaker id; the engine
/// renumbers densely afterwards.
fn utterance_segments(utterances: Vec<Utterance>) -> Vec<Segment> {
    let mut labels: Vec<String> = Vec::new();
    utterances
        .into_iter()
        .filter(|u| !u.text.trim().is_empty())
        .map(|u| {
            let speaker_id = match labels.iter().position(|l| *l == u.speaker) {
                Some(index) => index as u32,
                None => {
                    labels.push(u.speaker.clone());
                    (labels.len() - 1) as u32
                }
            };
            Segment::new(speaker_id, u.text.trim(), u.start, u.end)
        })
        .collect()
}

// ===== API Request/Response Types =====

#[derive(Debug, Serialize)]
struct TranscriptionRequest {
    audio_url: String,
    speaker_labels: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    id: String,
    status: String,
    #[serde(default)]
    utterances: Option<Vec<Utterance>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Utterance {
    text: String,
    start: i64,
    end: i64,
    speaker: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemblyai_service_creation() {
        let service = AssemblyAiService::new("test_api_key".to_string());
        assert_eq!(service.provider_name(), "assemblyai");
        assert!(service.is_configured());
    }

    #[test]
    fn test_assemblyai_service_not_configured() {
        let service = AssemblyAiService::new(String::new());
        assert!(!service.is_configured());
    }

    #[test]
    fn test_utterance_speaker_mapping() {
        let utterances = vec![
            Utterance {
                text: "Hello".to_string(),
                start: 0,
                end: 5000,
                speaker: "B".to_string(),
            },
            Utterance {
                text: "Hi there".to_string(),
                start: 5000,
                end: 10000,
                speaker: "A".to_string(),
            },
            Utterance {
                text: "Again".to_string(),
                start: 10000,
                end: 12000,
                speaker: "B".to_string(),
            },
        ];
        let segments = utterance_segments(utterances);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].speaker_id, 0);
        assert_eq!(segments[1].speaker_id, 1);
        assert_eq!(segments[2].speaker_id, 0);
    }

    #[test]
    fn test_empty_utterances_dropped() {
        let utterances = vec![Utterance {
            text: "   ".to_string(),
            start: 0,
            end: 1000,
            speaker: "A".to_string(),
        }];
        assert!(utterance_segments(utterances).is_empty());
    }
}
