//! Job orchestrator
//!
//! Ingress routing, the worker pipeline, delivery, billing and recovery.
//! Every operation borrows the `Service` struct owned by the runtime entry
//! point; the trace id travels as a parameter, never as a global.

pub mod cloud_drive;
pub mod commands;
pub mod delivery;
pub mod ingress;
pub mod payments;
pub mod ratelimit;
pub mod sweep;
pub mod update;
pub mod upload;
pub mod worker;

use crate::config::AppConfig;
use crate::engine::TranscriptionEngine;
use crate::formatter::Formatter;
use crate::ports::chat::ChatPort;
use crate::ports::media::MediaPort;
use crate::ports::object_store::ObjectStorePort;
use crate::ports::queue::QueuePort;
use crate::ports::storage::StoragePort;
use self::ratelimit::RateLimiter;
use std::sync::Arc;

/// Audio shorter than this runs inline in the ingress handler (seconds)
pub const SYNC_THRESHOLD_SECS: i64 = 15;

/// Audio at or above this gets the two-pass diarization treatment (seconds)
pub const DIARIZATION_THRESHOLD_SECS: f64 = 60.0;

/// Minimum speaker transitions before a recording counts as a dialogue
pub const MIN_DIALOGUE_TRANSITIONS: usize = 3;

/// Queue visibility window while a worker holds a job (seconds)
pub const QUEUE_VISIBILITY_SECS: u32 = 600;

/// Long-poll wait when receiving from the queue (seconds)
pub const QUEUE_WAIT_SECS: u32 = 1;

/// Jobs stuck in pending/processing longer than this get swept (seconds)
pub const STUCK_JOB_AGE_SECS: i64 = 3600;

/// Balances below this trigger a top-up hint after delivery
pub const LOW_BALANCE_WARNING_MINUTES: i64 = 5;

/// All service handles, built once per process and passed by reference
pub struct Service {
    pub config: AppConfig,
    pub chat: Arc<dyn ChatPort>,
    pub storage: Arc<dyn StoragePort>,
    pub queue: Arc<dyn QueuePort>,
    pub object_store: Arc<dyn ObjectStorePort>,
    pub media: Arc<dyn MediaPort>,
    pub engine: TranscriptionEngine,
    pub formatter: Formatter,
    pub rate_limiter: RateLimiter,
    /// Client for direct worker invocation (fire-and-forget)
    pub http: reqwest::Client,
}

/// Short opaque trace id propagated from ingress into every log line
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
pub mod testkit {
    //! Shared construction of a fully mocked `Service` for orchestrator tests

    use super::*;
    use crate::config::DiarizationBackend;
    use crate::engine::TranscriptionEngine;
    use crate::formatter::{Formatter, FormatterBackend};
    use crate::ports::llm::LlmConfig;
    use crate::ports::mocks::*;

    /// All mock handles, kept so tests can script and assert on them
    pub struct TestHarness {
        pub service: Service,
        pub chat: MockChat,
        pub storage: MockStorage,
        pub queue: MockQueue,
        pub object_store: MockObjectStore,
        pub media: MockMedia,
        pub asr: MockAsr,
        pub two_pass: MockAsyncTranscription,
        pub llm: MockLlm,
    }

    pub struct TestHarnessBuilder {
        pub storage: MockStorage,
        pub media: MockMedia,
        pub asr: MockAsr,
        pub two_pass: MockAsyncTranscription,
        pub llm: MockLlm,
        pub queue: MockQueue,
    }

    impl TestHarnessBuilder {
        pub fn new() -> Self {
            Self {
                storage: MockStorage::new(),
                media: MockMedia::with_duration(30.0),
                asr: MockAsr::returning("Transcribed text from simple ASR path."),
                two_pass: MockAsyncTranscription::new(),
                llm: MockLlm::failing(),
                queue: MockQueue::new(),
            }
        }

        pub fn build(self) -> TestHarness {
            let chat = MockChat::new();
            let object_store = MockObjectStore::new();

            let config = AppConfig {
                bot_token: "test-token".to_string(),
                owner_id: 999,
                dashscope_api_key: "test-key".to_string(),
                gemini_api_key: String::new(),
                assemblyai_api_key: String::new(),
                deepgram_api_key: String::new(),
                diarization_backend: DiarizationBackend::TwoPass,
                llm_backend: "qwen".to_string(),
                access_key_id: "ak".to_string(),
                access_key_secret: "sk".to_string(),
                mns_endpoint: "https://mns.test".to_string(),
                audio_jobs_queue: "test-jobs".to_string(),
                oss_bucket: "bucket".to_string(),
                oss_endpoint: "oss.test".to_string(),
                worker_url: String::new(),
                webhook_url: "https://bot.test".to_string(),
                db_path: ":memory:".to_string(),
                region: "test-1".to_string(),
                port: 0,
            };

            let engine = TranscriptionEngine::new(
                Arc::new(self.asr.clone()),
                Arc::new(self.two_pass.clone()),
                None,
                Arc::new(self.media.clone()),
                Arc::new(object_store.clone()),
                "ru",
            );
            let formatter = Formatter::new(vec![FormatterBackend {
                name: "qwen".to_string(),
                service: Arc::new(self.llm.clone()),
                config: LlmConfig::default(),
            }]);

            let service = Service {
                config,
                chat: Arc::new(chat.clone()),
                storage: Arc::new(self.storage.clone()),
                queue: Arc::new(self.queue.clone()),
                object_store: Arc::new(object_store.clone()),
                media: Arc::new(self.media.clone()),
                engine,
                formatter,
                rate_limiter: RateLimiter::new(),
                http: reqwest::Client::new(),
            };

            TestHarness {
                service,
                chat,
                storage: self.storage,
                queue: self.queue,
                object_store,
                media: self.media,
                asr: self.asr,
                two_pass: self.two_pass,
                llm: self.llm,
            }
        }
    }
}
