//! Media pipeline
//!
//! Turns an inbound artifact into the canonical form the ASR providers
//! expect: mono MP3 at 16 kHz, bitrate picked by duration tier. Video
//! containers get their audio track extracted first. All work happens in
//! ffmpeg/ffprobe subprocesses bounded by a hard wall-clock timeout.

use crate::error::{AppError, Result};
use crate::ports::media::{MediaPort, TempSet, PROBE_FALLBACK_SECS};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Hard wall-clock limit for any ffmpeg/ffprobe invocation
const FFMPEG_TIMEOUT_SECS: u64 = 60;
/// ffprobe gets a shorter leash: it only reads headers
const FFPROBE_TIMEOUT_SECS: u64 = 10;

/// ASR-native sample rate; a single-policy decision, not a tunable
const SAMPLE_RATE: &str = "16000";
const CHANNELS: &str = "1";
const FFMPEG_THREADS: &str = "4";

/// Container formats known to be incompatible with the ASR providers
const UNSUPPORTED_FORMATS: &[&str] = &["amr", "speex", "gsm"];

/// Container formats treated as video
const VIDEO_FORMATS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "matroska", "mpeg", "mpg"];

/// Encoding bitrate by duration tier (sample rate is uniformly 16 kHz)
fn bitrate_for_duration(duration_secs: f64) -> &'static str {
    if duration_secs <= 10.0 {
        "24k" // ultra-light
    } else if duration_secs <= 600.0 {
        "48k" // standard
    } else {
        "32k" // compressed
    }
}

/// Probed media attributes
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub duration: f64,
    pub format_name: String,
    pub has_audio_stream: bool,
}

impl MediaInfo {
    fn is_video(&self) -> bool {
        let format = self.format_name.to_lowercase();
        VIDEO_FORMATS.iter().any(|v| format.contains(v))
    }

    fn is_unsupported(&self) -> bool {
        let format = self.format_name.to_lowercase();
        UNSUPPORTED_FORMATS.iter().any(|u| format.contains(u))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
}

/// Parse ffprobe JSON output into `MediaInfo`
fn parse_probe_output(stdout: &str) -> Result<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_str(stdout)?;
    Ok(MediaInfo {
        duration: probe
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse().ok())
            .unwrap_or(0.0),
        format_name: probe.format.format_name.unwrap_or_default(),
        has_audio_stream: probe
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio")),
    })
}

fn temp_path(suffix: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "talkscribe_{}.{}",
        uuid::Uuid::new_v4().simple(),
        suffix
    ))
}

/// ffmpeg-backed media pipeline
pub struct FfmpegMediaPipeline;

impl FfmpegMediaPipeline {
    pub fn new() -> Self {
        Self
    }

    async fn run_tool(&self, program: &str, args: &[&str], timeout_secs: u64) -> Result<String> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(timeout_secs), command.output())
            .await
            .map_err(|_| AppError::MediaTimeout(timeout_secs))?
            .map_err(|e| AppError::Media(format!("failed to spawn {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // A video without sound shows up as an unmappable audio stream
            if stderr.contains("matches no streams") || stderr.contains("does not contain any stream")
            {
                return Err(AppError::NoAudioStream);
            }
            return Err(AppError::Media(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.chars().take(300).collect::<String>()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let path_str = path.to_string_lossy();
        let stdout = self
            .run_tool(
                "ffprobe",
                &[
                    "-v",
                    "quiet",
                    "-print_format",
                    "json",
                    "-show_format",
                    "-show_streams",
                    &path_str,
                ],
                FFPROBE_TIMEOUT_SECS,
            )
            .await
            .map_err(|e| AppError::ProbeFailed(e.to_string()))?;
        parse_probe_output(&stdout).map_err(|e| AppError::ProbeFailed(e.to_string()))
    }

    async fn transcode_to_mp3(
        &self,
        input: &Path,
        duration_secs: f64,
        temps: &TempSet,
    ) -> Result<PathBuf> {
        let output = temp_path("mp3");
        temps.register(&output);

        let bitrate = bitrate_for_duration(duration_secs);
        log::info!(
            "Converting audio: {} -> {} ({}bit/s tier for {:.1}s)",
            input.display(),
            output.display(),
            bitrate,
            duration_secs
        );

        let input_str = input.to_string_lossy();
        let output_str = output.to_string_lossy();
        self.run_tool(
            "ffmpeg",
            &[
                "-y",
                "-i",
                &input_str,
                "-vn",
                "-b:a",
                bitrate,
                "-ar",
                SAMPLE_RATE,
                "-ac",
                CHANNELS,
                "-threads",
                FFMPEG_THREADS,
                &output_str,
            ],
            FFMPEG_TIMEOUT_SECS,
        )
        .await?;

        Ok(output)
    }
}

impl Default for FfmpegMediaPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaPort for FfmpegMediaPipeline {
    async fn prepare(&self, input: &Path, temps: &TempSet) -> Result<PathBuf> {
        let info = match self.probe(input).await {
            Ok(info) => info,
            Err(e) => {
                // Probe failure is non-fatal for plain audio; assume a
                // standard-tier artifact and let ffmpeg decide
                log::warn!("Probe failed for {}: {}, transcoding blind", input.display(), e);
                MediaInfo {
                    duration: PROBE_FALLBACK_SECS,
                    ..MediaInfo::default()
                }
            }
        };

        if info.is_unsupported() {
            return Err(AppError::UnsupportedFormat(info.format_name));
        }

        if info.is_video() && !info.has_audio_stream {
            return Err(AppError::NoAudioStream);
        }

        // Extraction and transcode collapse into one ffmpeg invocation:
        // -vn drops the video track when one is present
        self.transcode_to_mp3(input, info.duration, temps).await
    }

    async fn duration(&self, path: &Path) -> f64 {
        match self.probe(path).await {
            Ok(info) if info.duration > 0.0 => info.duration,
            Ok(_) => {
                log::warn!(
                    "Probe returned zero duration for {}, using default {}s",
                    path.display(),
                    PROBE_FALLBACK_SECS
                );
                PROBE_FALLBACK_SECS
            }
            Err(e) => {
                log::warn!(
                    "Could not get audio duration for {}: {}, using default {}s",
                    path.display(),
                    e,
                    PROBE_FALLBACK_SECS
                );
                PROBE_FALLBACK_SECS
            }
        }
    }

    async fn split(&self, path: &Path, chunk_secs: u32, temps: &TempSet) -> Vec<PathBuf> {
        let duration = self.duration(path).await;
        let chunk_count = chunk_count_for(duration, chunk_secs);
        if chunk_count <= 1 {
            return vec![path.to_path_buf()];
        }

        log::info!(
            "Splitting {} ({:.1}s) into {} chunks of {}s",
            path.display(),
            duration,
            chunk_count,
            chunk_secs
        );

        let mut chunks = Vec::with_capacity(chunk_count);
        for i in 0..chunk_count {
            let chunk = temp_path("mp3");
            temps.register(&chunk);

            let offset = (i as u64 * chunk_secs as u64).to_string();
            let length = chunk_secs.to_string();
            let input_str = path.to_string_lossy().into_owned();
            let chunk_str = chunk.to_string_lossy().into_owned();
            let result = self
                .run_tool(
                    "ffmpeg",
                    &[
                        "-y", "-i", &input_str, "-ss", &offset, "-t", &length, "-c", "copy",
                        &chunk_str,
                    ],
                    FFMPEG_TIMEOUT_SECS,
                )
                .await;

            match result {
                Ok(_) => chunks.push(chunk),
                Err(e) => {
                    // Fall back to single-shot on any chunking failure
                    log::warn!("Chunk {} of {} failed: {}, falling back to single file", i + 1, chunk_count, e);
                    return vec![path.to_path_buf()];
                }
            }
        }

        chunks
    }
}

/// Number of equal-interval chunks for the given duration
pub fn chunk_count_for(duration_secs: f64, chunk_secs: u32) -> usize {
    if duration_secs <= chunk_secs as f64 {
        1
    } else {
        (duration_secs / chunk_secs as f64).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitrate_tiers() {
        assert_eq!(bitrate_for_duration(5.0), "24k");
        assert_eq!(bitrate_for_duration(10.0), "24k");
        assert_eq!(bitrate_for_duration(10.1), "48k");
        assert_eq!(bitrate_for_duration(600.0), "48k");
        assert_eq!(bitrate_for_duration(601.0), "32k");
        assert_eq!(bitrate_for_duration(3600.0), "32k");
    }

    #[test]
    fn test_chunk_count_boundaries() {
        assert_eq!(chunk_count_for(150.0, 150), 1);
        assert_eq!(chunk_count_for(151.0, 150), 2);
        assert_eq!(chunk_count_for(300.0, 150), 2);
        assert_eq!(chunk_count_for(301.0, 150), 3);
        assert_eq!(chunk_count_for(10.0, 150), 1);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{
            "format": {"duration": "123.45", "format_name": "ogg"},
            "streams": [{"codec_type": "audio"}]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert!((info.duration - 123.45).abs() < 0.001);
        assert_eq!(info.format_name, "ogg");
        assert!(info.has_audio_stream);
        assert!(!info.is_video());
        assert!(!info.is_unsupported());
    }

    #[test]
    fn test_parse_probe_video_without_audio() {
        let json = r#"{
            "format": {"duration": "60.0", "format_name": "mov,mp4,m4a,3gp,3g2,mj2"},
            "streams": [{"codec_type": "video"}]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert!(info.is_video());
        assert!(!info.has_audio_stream);
    }

    #[test]
    fn test_unsupported_format_detection() {
        let info = MediaInfo {
            duration: 10.0,
            format_name: "amr".to_string(),
            has_audio_stream: true,
        };
        assert!(info.is_unsupported());
    }

    #[test]
    fn test_parse_probe_tolerates_missing_fields() {
        let info = parse_probe_output("{}").unwrap();
        assert_eq!(info.duration, 0.0);
        assert!(!info.has_audio_stream);
    }

    #[tokio::test]
    async fn test_prepare_registers_temp_even_when_transcode_fails() {
        // ffmpeg is expected to fail on a nonexistent input; the output temp
        // path must still be registered so cleanup stays exhaustive
        let pipeline = FfmpegMediaPipeline::new();
        let temps = TempSet::new();
        let missing = Path::new("/tmp/talkscribe-no-such-input.ogg");
        let result = pipeline.prepare(missing, &temps).await;
        assert!(result.is_err());
        temps.cleanup().await;
    }
}
