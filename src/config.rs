//! Application configuration
//!
//! All secrets and endpoints come from the environment; the struct is built
//! once at startup and shared by reference through the service.

use crate::error::{AppError, Result};

/// Which diarization provider to try first; every variant falls back to
/// the two-pass default on empty result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiarizationBackend {
    /// Two-pass DashScope protocol (speaker pass + text pass). Default.
    TwoPass,
    AssemblyAi,
    Deepgram,
}

impl DiarizationBackend {
    pub fn from_env_value(value: &str) -> Self {
        match value {
            "assemblyai" => DiarizationBackend::AssemblyAi,
            "deepgram" => DiarizationBackend::Deepgram,
            _ => DiarizationBackend::TwoPass,
        }
    }
}

/// Runtime configuration for the whole service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Telegram bot token
    pub bot_token: String,
    /// Admin user id; 0 disables admin notifications
    pub owner_id: i64,

    /// DashScope API key (ASR + Qwen LLM)
    pub dashscope_api_key: String,
    /// Gemini API key (formatter fallback / dialogue default)
    pub gemini_api_key: String,
    /// AssemblyAI / Deepgram keys for the alternate diarization providers
    pub assemblyai_api_key: String,
    pub deepgram_api_key: String,
    pub diarization_backend: DiarizationBackend,
    /// Formatter provider default; user `llm_backend` setting overrides
    pub llm_backend: String,

    /// Alibaba credentials for MNS and OSS signing
    pub access_key_id: String,
    pub access_key_secret: String,
    /// MNS endpoint, e.g. https://123.mns.eu-central-1.aliyuncs.com
    pub mns_endpoint: String,
    pub audio_jobs_queue: String,
    /// OSS bucket + endpoint for large uploads and diarization input
    pub oss_bucket: String,
    pub oss_endpoint: String,

    /// Direct worker invocation URL; empty disables the HTTP-first path
    pub worker_url: String,
    /// Public webhook base URL (used by the /upload Mini App button)
    pub webhook_url: String,

    /// SQLite database path
    pub db_path: String,
    /// Deployment region reported by the status endpoint
    pub region: String,
    /// HTTP listen port
    pub port: u16,
}

fn env(key: &str) -> String {
    std::env::var(key).unwrap_or_default()
}

impl AppConfig {
    /// Build configuration from the process environment.
    ///
    /// Only the bot token is hard-required; every external integration
    /// degrades gracefully when unconfigured (sync fallback, formatter
    /// pass-through), matching the service's availability posture.
    pub fn from_env() -> Result<Self> {
        let bot_token = env("TELEGRAM_BOT_TOKEN");
        if bot_token.is_empty() {
            return Err(AppError::Config("TELEGRAM_BOT_TOKEN not configured".to_string()));
        }

        let config = Self {
            bot_token,
            owner_id: env("OWNER_ID").parse().unwrap_or(0),
            dashscope_api_key: env("DASHSCOPE_API_KEY"),
            gemini_api_key: std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("GOOGLE_API_KEY"))
                .unwrap_or_default(),
            assemblyai_api_key: env("ASSEMBLYAI_API_KEY"),
            deepgram_api_key: env("DEEPGRAM_API_KEY"),
            diarization_backend: DiarizationBackend::from_env_value(&env("DIARIZATION_BACKEND")),
            llm_backend: {
                let backend = env("LLM_BACKEND");
                if backend.is_empty() {
                    "qwen".to_string()
                } else {
                    backend
                }
            },
            access_key_id: env("ALIBABA_ACCESS_KEY"),
            access_key_secret: env("ALIBABA_SECRET_KEY"),
            mns_endpoint: env("MNS_ENDPOINT"),
            audio_jobs_queue: {
                let queue = env("AUDIO_JOBS_QUEUE");
                if queue.is_empty() {
                    "talkscribe-audio-jobs".to_string()
                } else {
                    queue
                }
            },
            oss_bucket: env("OSS_BUCKET"),
            oss_endpoint: env("OSS_ENDPOINT"),
            worker_url: env("AUDIO_PROCESSOR_URL"),
            webhook_url: env("WEBHOOK_URL"),
            db_path: {
                let path = env("DB_PATH");
                if path.is_empty() {
                    "talkscribe.db".to_string()
                } else {
                    path
                }
            },
            region: {
                let region = env("REGION");
                if region.is_empty() {
                    "eu-central-1".to_string()
                } else {
                    region
                }
            },
            port: env("PORT").parse().unwrap_or(9000),
        };

        if config.mns_endpoint.is_empty() {
            log::warn!("MNS_ENDPOINT not configured — async processing disabled, sync fallback will be used");
        }

        Ok(config)
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.owner_id != 0 && user_id == self.owner_id
    }
}
