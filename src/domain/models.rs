/// Domain models for talkscribe
///
/// These models represent core business entities and are platform-agnostic.
use serde::{Deserialize, Serialize};

/// Minutes granted to a new user on first contact
pub const TRIAL_MINUTES: i64 = 15;

/// Status of an audio job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Redelivery of a message for a job in one of these states is a no-op.
    pub fn blocks_redelivery(&self) -> bool {
        matches!(self, JobStatus::Processing | JobStatus::Completed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// What the inbound artifact was, as declared by the chat platform
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Voice,
    Audio,
    Video,
    VideoNote,
    Document,
    /// Direct-download URL (cloud-drive import or object-store upload)
    Url,
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::Voice => write!(f, "voice"),
            FileKind::Audio => write!(f, "audio"),
            FileKind::Video => write!(f, "video"),
            FileKind::VideoNote => write!(f, "video_note"),
            FileKind::Document => write!(f, "document"),
            FileKind::Url => write!(f, "url"),
        }
    }
}

/// A bot user with a minute balance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    /// Billable unit; never negative
    pub balance_minutes: i64,
    pub trial_status: String,
    /// Free-form settings map, serialized as JSON in storage
    pub settings: UserSettings,
    pub created_at: i64,
    pub last_activity: i64,
}

impl User {
    /// Creates a new user seeded with the trial grant
    pub fn with_trial(user_id: i64, first_name: &str, last_name: &str, username: &str) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            user_id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            username: username.to_string(),
            balance_minutes: TRIAL_MINUTES,
            trial_status: "approved".to_string(),
            settings: UserSettings::default(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Short display handle for admin notifications
    pub fn display_name(&self) -> String {
        if !self.username.is_empty() {
            format!("@{}", self.username)
        } else if !self.first_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("ID_{}", self.user_id)
        }
    }
}

/// Recognized user settings and their defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSettings {
    /// Wrap delivered text in <code> tags; switches delivery to HTML mode
    #[serde(default)]
    pub use_code_tags: bool,
    /// Preserve the letter ё; when false it is replaced with е
    #[serde(default = "default_true")]
    pub use_yo: bool,
    /// "split" (default) or "file"
    #[serde(default = "default_long_text_mode")]
    pub long_text_mode: String,
    /// Emit "Speaker N:" headers above dialogue turns
    #[serde(default)]
    pub speaker_labels: bool,
    /// Admin-only: send the diarization debug dump after processing
    #[serde(default)]
    pub debug_mode: bool,
    /// Formatter provider override; empty uses the service default
    #[serde(default)]
    pub llm_backend: String,
}

fn default_true() -> bool {
    true
}

fn default_long_text_mode() -> String {
    "split".to_string()
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            use_code_tags: false,
            use_yo: true,
            long_text_mode: default_long_text_mode(),
            speaker_labels: false,
            debug_mode: false,
            llm_backend: String::new(),
        }
    }
}

impl UserSettings {
    pub fn from_json(json: &str) -> Self {
        serde_json::from_str(json).unwrap_or_default()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn wants_file_output(&self) -> bool {
        self.long_text_mode == "file"
    }
}

/// A transcription job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub user_id: i64,
    pub chat_id: i64,
    /// Platform file id, direct URL, or object-store key
    pub file_ref: String,
    pub file_kind: FileKind,
    /// Declared duration in seconds; 0 for documents and uploads
    pub duration: i64,
    pub status: JobStatus,
    /// Progress message to edit in place; 0 when none was posted
    pub status_message_id: i64,
    /// Propagated through all components into structured log lines
    pub trace_id: String,
    pub error: Option<String>,
    pub result: Option<String>,
    pub created_at: i64,
}

impl Job {
    pub fn new(
        user_id: i64,
        chat_id: i64,
        file_ref: &str,
        file_kind: FileKind,
        duration: i64,
        status_message_id: i64,
        trace_id: &str,
    ) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            user_id,
            chat_id,
            file_ref: file_ref.to_string(),
            file_kind,
            duration,
            status: JobStatus::Pending,
            status_message_id,
            trace_id: trace_id.to_string(),
            error: None,
            result: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Billable minutes for a duration in seconds, rounded up
    pub fn minutes_for(duration_secs: i64) -> i64 {
        (duration_secs + 59) / 60
    }
}

/// Serialized job descriptor carried on the queue.
///
/// Carries everything a worker needs to operate without re-reading the job
/// row; delivered at-least-once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobDescriptor {
    pub job_id: String,
    pub user_id: i64,
    pub chat_id: i64,
    pub file_ref: String,
    pub file_kind: FileKind,
    pub duration: i64,
    #[serde(default)]
    pub status_message_id: i64,
    #[serde(default)]
    pub trace_id: String,
}

impl JobDescriptor {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            user_id: job.user_id,
            chat_id: job.chat_id,
            file_ref: job.file_ref.clone(),
            file_kind: job.file_kind,
            duration: job.duration,
            status_message_id: job.status_message_id,
            trace_id: job.trace_id.clone(),
        }
    }
}

/// Append-only transcription log row, written exactly once per completed job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionLog {
    pub user_id: i64,
    pub duration: i64,
    pub char_count: i64,
    pub status: String,
    pub created_at: i64,
}

impl TranscriptionLog {
    pub fn completed(user_id: i64, duration: i64, char_count: i64) -> Self {
        Self {
            user_id,
            duration,
            char_count,
            status: "completed".to_string(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Append-only payment log row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentLog {
    pub user_id: i64,
    pub payload: String,
    pub stars_amount: i64,
    pub minutes: i64,
    pub created_at: i64,
}

/// In-memory diarization segment.
///
/// Speaker ids are small integers dense from 0 in order of first appearance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub speaker_id: u32,
    pub text: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

impl Segment {
    pub fn new(speaker_id: u32, text: &str, start_ms: i64, end_ms: i64) -> Self {
        Self {
            speaker_id,
            text: text.to_string(),
            start_ms,
            end_ms,
        }
    }
}

/// Count of speaker changes between consecutive segments
pub fn speaker_transitions(segments: &[Segment]) -> usize {
    segments
        .windows(2)
        .filter(|w| w[0].speaker_id != w[1].speaker_id)
        .count()
}

/// Number of distinct speakers across the segments
pub fn unique_speakers(segments: &[Segment]) -> usize {
    let mut seen = std::collections::HashSet::new();
    for segment in segments {
        seen.insert(segment.speaker_id);
    }
    seen.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_rounding() {
        assert_eq!(Job::minutes_for(0), 0);
        assert_eq!(Job::minutes_for(1), 1);
        assert_eq!(Job::minutes_for(59), 1);
        assert_eq!(Job::minutes_for(60), 1);
        assert_eq!(Job::minutes_for(61), 2);
        assert_eq!(Job::minutes_for(120), 2);
    }

    #[test]
    fn test_settings_defaults_from_empty_json() {
        let settings = UserSettings::from_json("{}");
        assert!(!settings.use_code_tags);
        assert!(settings.use_yo);
        assert_eq!(settings.long_text_mode, "split");
        assert!(!settings.speaker_labels);
    }

    #[test]
    fn test_settings_roundtrip() {
        let mut settings = UserSettings::default();
        settings.use_code_tags = true;
        settings.long_text_mode = "file".to_string();
        let parsed = UserSettings::from_json(&settings.to_json());
        assert_eq!(parsed, settings);
        assert!(parsed.wants_file_output());
    }

    #[test]
    fn test_job_descriptor_roundtrip() {
        let job = Job::new(12345, 67890, "file-abc", FileKind::Voice, 120, 42, "a1b2c3d4");
        let descriptor = JobDescriptor::from_job(&job);
        let json = serde_json::to_string(&descriptor).unwrap();
        let parsed: JobDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, descriptor);
    }

    #[test]
    fn test_speaker_transitions() {
        let segments = vec![
            Segment::new(0, "a", 0, 1000),
            Segment::new(1, "b", 1000, 2000),
            Segment::new(0, "c", 2000, 3000),
            Segment::new(0, "d", 3000, 4000),
        ];
        assert_eq!(speaker_transitions(&segments), 2);
        assert_eq!(unique_speakers(&segments), 2);
    }

    #[test]
    fn test_redelivery_blocking_states() {
        assert!(!JobStatus::Pending.blocks_redelivery());
        assert!(JobStatus::Processing.blocks_redelivery());
        assert!(JobStatus::Completed.blocks_redelivery());
        assert!(!JobStatus::Failed.blocks_redelivery());
    }
}
