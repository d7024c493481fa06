use std::sync::Arc;
use std::time::Duration;

use talkscribe::adapters::chat::TelegramService;
use talkscribe::adapters::object_store::OssStore;
use talkscribe::adapters::queue::MnsQueue;
use talkscribe::adapters::services::asr::{
    AssemblyAiService, DashScopeAsr, DashScopeTranscription, DeepgramService,
};
use talkscribe::adapters::services::llm::{GeminiService, QwenService};
use talkscribe::adapters::storage::SqliteStorage;
use talkscribe::app::ratelimit::RateLimiter;
use talkscribe::app::{self, Service};
use talkscribe::config::{AppConfig, DiarizationBackend};
use talkscribe::engine::TranscriptionEngine;
use talkscribe::error::Result;
use talkscribe::formatter::{Formatter, FormatterBackend};
use talkscribe::media::FfmpegMediaPipeline;
use talkscribe::ports::asr::DiarizationPort;
use talkscribe::ports::llm::LlmConfig;
use talkscribe::server;

/// Recognition language; the service is single-language by policy
const LANGUAGE: &str = "ru";

/// Wire all adapters into one `Service`
fn build_service(config: AppConfig) -> Result<Service> {
    let storage = SqliteStorage::new(config.db_path.clone().into())?;
    storage.run_migrations()?;

    let chat = Arc::new(TelegramService::new(config.bot_token.clone()));
    let queue = Arc::new(MnsQueue::new(
        config.mns_endpoint.clone(),
        config.access_key_id.clone(),
        config.access_key_secret.clone(),
    ));
    let object_store = Arc::new(OssStore::new(
        config.oss_bucket.clone(),
        config.oss_endpoint.clone(),
        config.access_key_id.clone(),
        config.access_key_secret.clone(),
    ));
    let media = Arc::new(FfmpegMediaPipeline::new());

    let alt_diarization: Option<Arc<dyn DiarizationPort>> = match config.diarization_backend {
        DiarizationBackend::AssemblyAi => Some(Arc::new(AssemblyAiService::new(
            config.assemblyai_api_key.clone(),
        ))),
        DiarizationBackend::Deepgram => Some(Arc::new(DeepgramService::new(
            config.deepgram_api_key.clone(),
        ))),
        DiarizationBackend::TwoPass => None,
    };

    let engine = TranscriptionEngine::new(
        Arc::new(DashScopeAsr::new(config.dashscope_api_key.clone())),
        Arc::new(DashScopeTranscription::new(config.dashscope_api_key.clone())),
        alt_diarization,
        media.clone(),
        object_store.clone(),
        LANGUAGE,
    );

    // Qwen first, Gemini as fallback; the orchestrator reorders per user
    // settings and the dialogue policy
    let mut backends = vec![
        FormatterBackend {
            name: "qwen".to_string(),
            service: Arc::new(QwenService::new(config.dashscope_api_key.clone())),
            config: LlmConfig::default(),
        },
        FormatterBackend {
            name: "gemini".to_string(),
            service: Arc::new(GeminiService::new(config.gemini_api_key.clone())),
            config: LlmConfig::default(),
        },
    ];
    if config.llm_backend == "gemini" {
        backends.reverse();
    }
    let formatter = Formatter::new(backends);

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to create HTTP client");

    Ok(Service {
        config,
        chat,
        storage: Arc::new(storage),
        queue,
        object_store,
        media,
        engine,
        formatter,
        rate_limiter: RateLimiter::new(),
        http,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = AppConfig::from_env()?;
    let port = config.port;
    let has_queue = !config.mns_endpoint.is_empty();
    log::info!(
        "Starting talkscribe v{} in {}",
        env!("CARGO_PKG_VERSION"),
        config.region
    );

    let service = Arc::new(build_service(config)?);

    // The worker loop shares the process with the webhook surface; the
    // queue still decouples them so either side can run alone elsewhere
    if has_queue {
        tokio::spawn(app::worker::run_worker_loop(Arc::clone(&service)));
    }

    // Hourly orphan sweep; /flush triggers the same pass on demand
    {
        let sweeper = Arc::clone(&service);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            ticker.tick().await; // immediate first tick is not a sweep
            loop {
                ticker.tick().await;
                if let Err(e) = app::sweep::recover_orphaned_jobs(&sweeper).await {
                    log::error!("Scheduled sweep failed: {e}");
                }
            }
        });
    }

    let router = server::router(service);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("Listening on port {port}");
    axum::serve(listener, router).await?;

    Ok(())
}
