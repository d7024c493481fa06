//! Transcription engine
//!
//! Selects between single-shot and chunked ASR by duration, and between the
//! one-call diarization providers and the two-pass protocol by configuration.

pub mod merge;

use crate::domain::models::Segment;
use crate::error::{AppError, Result};
use crate::ports::asr::{AsrPort, AsyncTranscriptionPort, DiarizationPort, PassResult};
use crate::ports::media::{MediaPort, TempSet};
use crate::ports::object_store::ObjectStorePort;
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Longest audio a single ASR call accepts (seconds)
pub const MAX_CHUNK_SECONDS: u32 = 150;

/// Hard deadline for each asynchronous transcription pass
pub const PASS_TIMEOUT_SECS: u64 = 270;

/// Chunk texts shorter than this are treated as empty
const MIN_CHUNK_TEXT_CHARS: usize = 3;

/// Fraction of failed chunks above which the whole operation fails
const CHUNK_FAILURE_TOLERANCE: f64 = 0.5;

/// Progress callback invoked before each chunk of a chunked transcription
#[async_trait]
pub trait ChunkProgress: Send + Sync {
    async fn on_chunk(&self, current: usize, total: usize);
}

/// No-op progress sink
pub struct SilentProgress;

#[async_trait]
impl ChunkProgress for SilentProgress {
    async fn on_chunk(&self, _current: usize, _total: usize) {}
}

/// Result of a diarization attempt
#[derive(Debug, Clone, Default)]
pub struct DiarizedTranscript {
    /// Joined raw text; empty when both passes failed
    pub text: String,
    /// Merged speaker-attributed segments; empty when speakers are unknown
    pub segments: Vec<Segment>,
}

impl DiarizedTranscript {
    /// True when the attempt produced nothing and the caller should fall
    /// back to single-pass ASR
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.segments.is_empty()
    }
}

/// The transcription engine: single-pass, chunked, and two-pass diarized ASR
pub struct TranscriptionEngine {
    asr: Arc<dyn AsrPort>,
    two_pass: Arc<dyn AsyncTranscriptionPort>,
    /// Alternate one-call diarization provider, tried before the two-pass
    /// protocol when configured
    alt_diarization: Option<Arc<dyn DiarizationPort>>,
    media: Arc<dyn MediaPort>,
    object_store: Arc<dyn ObjectStorePort>,
    language: String,
    /// Debug dump of the last diarization attempt, for the admin setting
    last_debug: Mutex<Option<String>>,
}

impl TranscriptionEngine {
    pub fn new(
        asr: Arc<dyn AsrPort>,
        two_pass: Arc<dyn AsyncTranscriptionPort>,
        alt_diarization: Option<Arc<dyn DiarizationPort>>,
        media: Arc<dyn MediaPort>,
        object_store: Arc<dyn ObjectStorePort>,
        language: &str,
    ) -> Self {
        Self {
            asr,
            two_pass,
            alt_diarization,
            media,
            object_store,
            language: language.to_string(),
            last_debug: Mutex::new(None),
        }
    }

    /// Transcribe an audio file, chunking when it exceeds the single-call
    /// limit. The progress sink is invoked with `(i, n)` before each chunk.
    pub async fn transcribe(
        &self,
        audio_path: &Path,
        temps: &TempSet,
        progress: &dyn ChunkProgress,
    ) -> Result<String> {
        let duration = self.media.duration(audio_path).await;
        if duration <= MAX_CHUNK_SECONDS as f64 {
            let text = self.asr.transcribe_file(audio_path, &self.language).await?;
            if text.trim().chars().count() < MIN_CHUNK_TEXT_CHARS {
                return Err(AppError::TranscriptionEmpty);
            }
            return Ok(text.trim().to_string());
        }

        let chunks = self.media.split(audio_path, MAX_CHUNK_SECONDS, temps).await;
        let total = chunks.len();
        log::info!(
            "Chunked transcription: {:.1}s split into {} chunks",
            duration,
            total
        );

        let mut texts: Vec<String> = Vec::with_capacity(total);
        let mut failed = 0usize;
        for (i, chunk) in chunks.iter().enumerate() {
            progress.on_chunk(i + 1, total).await;
            match self.asr.transcribe_file(chunk, &self.language).await {
                Ok(text) => {
                    let text = text.trim().to_string();
                    if text.chars().count() >= MIN_CHUNK_TEXT_CHARS {
                        texts.push(text);
                    }
                }
                Err(e) => {
                    log::warn!("Chunk {}/{} failed: {}", i + 1, total, e);
                    failed += 1;
                }
            }
        }

        if failed as f64 > total as f64 * CHUNK_FAILURE_TOLERANCE {
            return Err(AppError::ChunkedAsrFailed(failed, total));
        }
        if texts.is_empty() {
            return Err(AppError::TranscriptionEmpty);
        }

        Ok(texts.join(" "))
    }

    /// Transcribe with speaker separation.
    ///
    /// An alternate one-call provider runs first when configured and falls
    /// back to the two-pass protocol on failure or empty result. An
    /// all-failed attempt returns an empty transcript: the caller falls back
    /// to single-pass ASR.
    pub async fn transcribe_with_diarization(
        &self,
        audio_path: &Path,
        _temps: &TempSet,
    ) -> Result<DiarizedTranscript> {
        if let Some(alt) = &self.alt_diarization {
            match alt.diarize_file(audio_path, &self.language).await {
                Ok(segments) if !segments.is_empty() => {
                    log::info!(
                        "Diarization via {}: {} segments",
                        alt.provider_name(),
                        segments.len()
                    );
                    let segments = merge::renumber_speakers(segments);
                    let text = segments
                        .iter()
                        .map(|s| s.text.trim())
                        .filter(|t| !t.is_empty())
                        .collect::<Vec<_>>()
                        .join(" ");
                    self.record_debug(&format!(
                        "backend={} segments={}",
                        alt.provider_name(),
                        segments.len()
                    ));
                    return Ok(DiarizedTranscript { text, segments });
                }
                Ok(_) => {
                    log::info!(
                        "{} returned no segments, falling back to two-pass",
                        alt.provider_name()
                    );
                }
                Err(e) => {
                    log::warn!(
                        "{} diarization failed: {}, falling back to two-pass",
                        alt.provider_name(),
                        e
                    );
                }
            }
        }

        self.two_pass_diarization(audio_path).await
    }

    async fn two_pass_diarization(&self, audio_path: &Path) -> Result<DiarizedTranscript> {
        // Both passes read the same signed object-store URL
        let key = format!("audio/{}.mp3", uuid::Uuid::new_v4().simple());
        self.object_store.put_file(&key, audio_path).await?;
        let audio_url = self
            .object_store
            .signed_get_url(&key, Duration::from_secs(15 * 60))?;

        let pass_timeout = Duration::from_secs(PASS_TIMEOUT_SECS);
        let (speaker_outcome, text_outcome) = futures_util::future::join(
            tokio::time::timeout(pass_timeout, self.two_pass.speaker_pass(&audio_url)),
            tokio::time::timeout(
                pass_timeout,
                self.two_pass.text_pass(&audio_url, &self.language),
            ),
        )
        .await;

        // The uploaded artifact is only needed for the passes themselves
        if let Err(e) = self.object_store.delete_object(&key).await {
            log::warn!("Failed to delete {key} from object store: {e}");
        }

        let speaker_pass = flatten_pass(speaker_outcome, "speaker");
        let text_pass = flatten_pass(text_outcome, "text");

        let result = match (&speaker_pass, &text_pass) {
            (Ok(speakers), Ok(texts)) => {
                let ratio = timeline_ratio(speakers, texts);
                self.record_debug(&format!(
                    "backend={} speaker_segments={} text_segments={} timeline_normalized={:.4}",
                    self.two_pass.provider_name(),
                    speakers.segments.len(),
                    texts.segments.len(),
                    ratio
                ));
                DiarizedTranscript {
                    text: texts.joined_text(),
                    segments: merge::merge_speaker_text(&speakers.segments, &texts.segments),
                }
            }
            (Ok(speakers), Err(e)) => {
                // Speakers preserved at the cost of text quality
                log::warn!("Text pass failed: {e}, using speaker-pass text");
                self.record_debug(&format!(
                    "backend={} speaker_segments={} text_pass_error={}",
                    self.two_pass.provider_name(),
                    speakers.segments.len(),
                    e
                ));
                DiarizedTranscript {
                    text: speakers.joined_text(),
                    segments: merge::renumber_speakers(speakers.segments.clone()),
                }
            }
            (Err(e), Ok(texts)) => {
                log::warn!("Speaker pass failed: {e}, no speaker attribution");
                self.record_debug(&format!(
                    "backend={} text_segments={} speaker_pass_error={}",
                    self.two_pass.provider_name(),
                    texts.segments.len(),
                    e
                ));
                DiarizedTranscript {
                    text: texts.joined_text(),
                    segments: Vec::new(),
                }
            }
            (Err(speaker_err), Err(text_err)) => {
                log::warn!(
                    "Both diarization passes failed: speaker={speaker_err}, text={text_err}"
                );
                self.record_debug(&format!(
                    "backend={} speaker_pass_error={} text_pass_error={}",
                    self.two_pass.provider_name(),
                    speaker_err,
                    text_err
                ));
                DiarizedTranscript::default()
            }
        };

        Ok(result)
    }

    fn record_debug(&self, dump: &str) {
        *self.last_debug.lock().unwrap() = Some(dump.to_string());
    }

    /// Debug dump of the last diarization attempt
    pub fn diarization_debug(&self) -> Option<String> {
        self.last_debug.lock().unwrap().clone()
    }
}

/// Collapse the timeout layer and the pass result into one `Result`
fn flatten_pass(
    outcome: std::result::Result<Result<PassResult>, tokio::time::error::Elapsed>,
    pass_name: &str,
) -> Result<PassResult> {
    match outcome {
        Ok(result) => result,
        Err(_) => {
            log::warn!("{pass_name} pass exceeded {PASS_TIMEOUT_SECS}s deadline");
            Err(AppError::AsrTimeout)
        }
    }
}

/// Ratio of pass timeline lengths; recorded for debugging, never applied
fn timeline_ratio(speakers: &PassResult, texts: &PassResult) -> f64 {
    let text_total = texts.total_ms();
    if text_total == 0 {
        return 0.0;
    }
    speakers.total_ms() as f64 / text_total as f64
}
