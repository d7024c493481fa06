/// ASR port traits
///
/// Two provider surfaces are used and both must be supported:
/// a synchronous single-file call with inline audio, and an asynchronous
/// submit-poll-fetch flow against a URL-referenced artifact.
/// Implementations: DashScope (both surfaces), AssemblyAI, Deepgram.
use crate::domain::models::Segment;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Port for synchronous single-shot transcription of a local audio file
#[async_trait]
pub trait AsrPort: Send + Sync {
    /// Transcribe one audio file; returns the raw text
    async fn transcribe_file(&self, audio_path: &Path, language: &str) -> Result<String>;

    /// Get the provider name
    fn provider_name(&self) -> &str;

    /// Check if the service is configured (has API key)
    fn is_configured(&self) -> bool;
}

/// Result of one asynchronous transcription pass
#[derive(Debug, Clone, Default)]
pub struct PassResult {
    /// Sentence- or word-level segments in timeline order.
    /// Speaker ids are the provider's raw labels, not yet renumbered.
    pub segments: Vec<Segment>,
}

impl PassResult {
    /// Joined text of all segments, single-space separated
    pub fn joined_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Total covered timeline in milliseconds
    pub fn total_ms(&self) -> i64 {
        self.segments.last().map(|s| s.end_ms).unwrap_or(0)
    }
}

/// Port for asynchronous submit-poll-fetch transcription of a remote artifact
#[async_trait]
pub trait AsyncTranscriptionPort: Send + Sync {
    /// Run a diarization-enabled pass: speaker labels and times are
    /// authoritative, text quality is secondary
    async fn speaker_pass(&self, audio_url: &str) -> Result<PassResult>;

    /// Run a text pass with the language pinned: text is authoritative,
    /// speaker labels (if any) are discarded by the caller
    async fn text_pass(&self, audio_url: &str, language: &str) -> Result<PassResult>;

    fn provider_name(&self) -> &str;

    fn is_configured(&self) -> bool;
}

/// Port for one-call diarization providers that return speaker-labeled
/// utterances directly (the alternate backends of the engine)
#[async_trait]
pub trait DiarizationPort: Send + Sync {
    /// Diarize a local audio file into speaker-labeled segments
    async fn diarize_file(&self, audio_path: &Path, language: &str) -> Result<Vec<Segment>>;

    fn provider_name(&self) -> &str;

    fn is_configured(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joined_text_skips_empty() {
        let pass = PassResult {
            segments: vec![
                Segment::new(0, "Hello", 0, 500),
                Segment::new(0, "  ", 500, 700),
                Segment::new(0, "world", 700, 1000),
            ],
        };
        assert_eq!(pass.joined_text(), "Hello world");
        assert_eq!(pass.total_ms(), 1000);
    }

    #[test]
    fn test_empty_pass() {
        let pass = PassResult::default();
        assert_eq!(pass.joined_text(), "");
        assert_eq!(pass.total_ms(), 0);
    }
}
