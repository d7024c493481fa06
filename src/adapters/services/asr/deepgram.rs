//! Deepgram diarization adapter
//!
//! Simpler API than AssemblyAI: a single request with the audio bytes in the
//! body returns speaker-labeled utterances directly.

use crate::domain::models::Segment;
use crate::error::{AppError, Result};
use crate::ports::asr::DiarizationPort;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEEPGRAM_API_BASE: &str = "https://api.deepgram.com/v1";

/// Deepgram service implementation
pub struct DeepgramService {
    client: Client,
    api_key: String,
}

impl DeepgramService {
    /// Create a new Deepgram service with the given API key
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300)) // Longer timeout for large files
            .build()
            .expect("Failed to create HTTP client");

        Self { client, api_key }
    }
}

#[async_trait]
impl DiarizationPort for DeepgramService {
    async fn diarize_file(&self, audio_path: &Path, language: &str) -> Result<Vec<Segment>> {
        log::info!("Diarizing with Deepgram: {}", audio_path.display());

        let buffer = tokio::fs::read(audio_path)
            .await
            .map_err(|e| AppError::AsrProvider(format!("Failed to read audio file: {e}")))?;

        let url = format!(
            "{DEEPGRAM_API_BASE}/listen?model=nova-2&diarize=true&utterances=true&punctuate=true&language={language}"
        );

        let response = self
            .client
            .post(&url)
            .header("authorization", format!("Token {}", self.api_key))
            .header("content-type", "audio/mpeg")
            .body(buffer)
            .send()
            .await
            .map_err(|e| AppError::AsrProvider(format!("Deepgram request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::AsrProvider(format!(
                "Deepgram API error ({status}): {error_text}"
            )));
        }

        let data: ListenResponse = response
            .json()
            .await
            .map_err(|e| AppError::AsrProvider(format!("Failed to parse Deepgram response: {e}")))?;

        let segments = utterance_segments(data.results.utterances);
        log::info!("Deepgram diarization complete: {} segments", segments.len());
        Ok(segments)
    }

    fn provider_name(&self) -> &str {
        "deepgram"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Convert utterances into timeline segments; Deepgram reports seconds as
/// floats, the engine works in milliseconds
fn utterance_segments(utterances: Vec<Utterance>) -> Vec<Segment> {
    utterances
        .into_iter()
        .filter(|u| !u.transcript.trim().is_empty())
        .map(|u| {
            Segment::new(
                u.speaker,
                u.transcript.trim(),
                (u.start * 1000.0) as i64,
                (u.end * 1000.0) as i64,
            )
        })
        .collect()
}

// ===== API Response Types =====

#[derive(Debug, Deserialize)]
struct ListenResponse {
    results: ListenResults,
}

#[derive(Debug, Deserialize)]
struct ListenResults {
    #[serde(default)]
    utterances: Vec<Utterance>,
}

#[derive(Debug, Deserialize)]
struct Utterance {
    transcript: String,
    start: f64,
    end: f64,
    #[serde(default)]
    speaker: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deepgram_service_creation() {
        let service = DeepgramService::new("test_api_key".to_string());
        assert_eq!(service.provider_name(), "deepgram");
        assert!(service.is_configured());
    }

    #[test]
    fn test_deepgram_service_not_configured() {
        let service = DeepgramService::new(String::new());
        assert!(!service.is_configured());
    }

    #[test]
    fn test_utterances_to_segments() {
        let json = r#"{
            "results": {
                "utterances": [
                    {"transcript": "Hello there.", "start": 0.0, "end": 2.5, "speaker": 0},
                    {"transcript": "General Kenobi.", "start": 2.5, "end": 5.0, "speaker": 1}
                ]
            }
        }"#;
        let parsed: ListenResponse = serde_json::from_str(json).unwrap();
        let segments = utterance_segments(parsed.results.utterances);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].end_ms, 2500);
        assert_eq!(segments[1].speaker_id, 1);
    }

    #[test]
    fn test_empty_results() {
        let parsed: ListenResponse = serde_json::from_str(r#"{"results": {}}"#).unwrap();
        assert!(utterance_segments(parsed.results.utterances).is_empty());
    }
}
