//! Worker pipeline
//!
//! `run_job` drives one job through download, transcription, formatting,
//! billing and delivery. The queue loop feeds it and deletes messages only
//! after a non-error outcome; everything else relies on redelivery plus the
//! dedup check.

use super::delivery::deliver_result;
use super::{
    Service, DIARIZATION_THRESHOLD_SECS, LOW_BALANCE_WARNING_MINUTES, MIN_DIALOGUE_TRANSITIONS,
    QUEUE_VISIBILITY_SECS, QUEUE_WAIT_SECS,
};
use crate::domain::models::{
    speaker_transitions, unique_speakers, FileKind, Job, JobDescriptor, JobStatus,
    TranscriptionLog, UserSettings,
};
use crate::domain::prompts::{render_dialogue, too_short_to_format, FormatOptions};
use crate::engine::{ChunkProgress, MAX_CHUNK_SECONDS};
use crate::error::{AppError, Result};
use crate::ports::chat::{ChatPort, ParseMode};
use crate::ports::media::TempSet;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// ASR sentinel emitted on silent input
const NO_SPEECH_SENTINEL: &str = "Продолжение следует...";

/// Attempts to delete a consumed queue message
const DELETE_RETRIES: u32 = 3;

/// Terminal outcome of one `run_job` execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Redelivery of an already processing/completed job
    Duplicate,
    InsufficientBalance,
    NoSpeech,
    /// Error path: job marked failed, user notified, message left for
    /// redelivery
    Failed,
}

impl JobOutcome {
    /// True when the queue message should be deleted
    pub fn consumes_message(&self) -> bool {
        !matches!(self, JobOutcome::Failed)
    }
}

/// Edits the progress message with per-chunk status
struct ChatChunkProgress {
    chat: Arc<dyn ChatPort>,
    chat_id: i64,
    progress_message_id: i64,
}

#[async_trait]
impl ChunkProgress for ChatChunkProgress {
    async fn on_chunk(&self, current: usize, total: usize) {
        if self.progress_message_id != 0 && total > 1 {
            let _ = self
                .chat
                .edit_message_text(
                    self.chat_id,
                    self.progress_message_id,
                    &format!("🎙 Распознаю речь... (часть {current} из {total})"),
                    ParseMode::Plain,
                )
                .await;
        }
    }
}

/// Process one queue-delivered job: dedup, mark processing, run the shared
/// pipeline, and persist the terminal state.
pub async fn run_job(service: &Service, descriptor: &JobDescriptor) -> Result<JobOutcome> {
    let trace = &descriptor.trace_id;
    log::info!(
        "[{trace}] Processing job {} for user {}",
        descriptor.job_id,
        descriptor.user_id
    );

    // Dedup: the queue is at-least-once, a prior execution wins
    match service.storage.get_job(&descriptor.job_id).await? {
        Some(job) if job.status.blocks_redelivery() => {
            log::warn!(
                "[{trace}] Job {} already {}, skipping redelivery",
                descriptor.job_id,
                job.status
            );
            return Ok(JobOutcome::Duplicate);
        }
        Some(_) => {}
        None => {
            // Direct-invocation path may race the row write; make the row
            // exist so the status machine has something to drive
            let mut job = Job::new(
                descriptor.user_id,
                descriptor.chat_id,
                &descriptor.file_ref,
                descriptor.file_kind,
                descriptor.duration,
                descriptor.status_message_id,
                trace,
            );
            job.job_id = descriptor.job_id.clone();
            if let Err(AppError::AlreadyExists(_)) = service.storage.create_job(&job).await {
                // Lost the race: re-read and re-check
                if let Some(job) = service.storage.get_job(&descriptor.job_id).await? {
                    if job.status.blocks_redelivery() {
                        return Ok(JobOutcome::Duplicate);
                    }
                }
            }
        }
    }
    service
        .storage
        .update_job(&descriptor.job_id, JobStatus::Processing, None, None)
        .await?;

    let temps = TempSet::new();
    let outcome = execute_pipeline(service, descriptor, &temps, true).await;
    // Temporary files are released on every control-flow exit
    temps.cleanup().await;

    match outcome {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            log::error!("[{trace}] Error processing job {}: {e}", descriptor.job_id);
            let error_text: String = e.to_string().chars().take(200).collect();
            let _ = service
                .storage
                .update_job(&descriptor.job_id, JobStatus::Failed, Some(&error_text), None)
                .await;
            let _ = service
                .chat
                .send_message(descriptor.chat_id, e.user_message(), ParseMode::Plain)
                .await;
            Ok(JobOutcome::Failed)
        }
    }
}

/// Run the pipeline inline for the sync path: no job row, no dedup, same
/// stages otherwise.
pub async fn run_sync(service: &Service, descriptor: &JobDescriptor) -> Result<JobOutcome> {
    let temps = TempSet::new();
    let outcome = execute_pipeline(service, descriptor, &temps, false).await;
    temps.cleanup().await;

    match outcome {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            log::error!(
                "[{}] Error in sync processing: {e}",
                descriptor.trace_id
            );
            let _ = service
                .chat
                .send_message(descriptor.chat_id, e.user_message(), ParseMode::Plain)
                .await;
            Ok(JobOutcome::Failed)
        }
    }
}

/// The shared pipeline body (steps 2-11 of the job state machine)
async fn execute_pipeline(
    service: &Service,
    descriptor: &JobDescriptor,
    temps: &TempSet,
    tracked: bool,
) -> Result<JobOutcome> {
    let trace = &descriptor.trace_id;
    let chat_id = descriptor.chat_id;

    // Progress message: reuse the ingress one or post fresh
    let progress_message_id = if descriptor.status_message_id != 0 {
        let _ = service
            .chat
            .edit_message_text(
                chat_id,
                descriptor.status_message_id,
                "🔄 Обработка началась...",
                ParseMode::Plain,
            )
            .await;
        descriptor.status_message_id
    } else {
        service
            .chat
            .send_message(chat_id, "🔄 Обработка началась...", ParseMode::Plain)
            .await
            .unwrap_or(0)
    };

    // Download
    if progress_message_id != 0 {
        let _ = service
            .chat
            .edit_message_text(chat_id, progress_message_id, "📥 Загружаю файл...", ParseMode::Plain)
            .await;
    }
    service.chat.send_chat_action(chat_id, "typing").await;

    let local_path = match descriptor.file_kind {
        FileKind::Url => service.chat.download_url(&descriptor.file_ref).await?,
        _ => {
            let file_path = service.chat.get_file_path(&descriptor.file_ref).await?;
            service.chat.download_file(&file_path).await?
        }
    };
    temps.register(&local_path);

    if progress_message_id != 0 {
        let _ = service
            .chat
            .edit_message_text(chat_id, progress_message_id, "🎙 Распознаю речь...", ParseMode::Plain)
            .await;
    }
    service.chat.send_chat_action(chat_id, "typing").await;

    let audio_path = service.media.prepare(&local_path, temps).await?;
    log::info!("[{trace}] Prepared audio at {}", audio_path.display());

    let user = service.storage.get_user(descriptor.user_id).await?;
    let settings = user
        .as_ref()
        .map(|u| u.settings.clone())
        .unwrap_or_default();

    // Probe-and-recheck: items declared with zero duration are billed by
    // their probed length
    let mut duration = descriptor.duration;
    let actual_duration = if duration == 0 {
        let probed = service.media.duration(&audio_path).await;
        log::info!(
            "[{trace}] Declared duration was 0, probe found {probed:.1}s"
        );
        duration = probed as i64;

        let needed = Job::minutes_for(duration);
        let available = user.as_ref().map(|u| u.balance_minutes).unwrap_or(0);
        if available < needed {
            service
                .chat
                .send_message(
                    chat_id,
                    "У вас недостаточно минут для транскрипции.\nИспользуйте /buy_minutes для покупки.",
                    ParseMode::Plain,
                )
                .await?;
            if progress_message_id != 0 {
                let _ = service.chat.delete_message(chat_id, progress_message_id).await;
            }
            if tracked {
                service
                    .storage
                    .update_job(
                        &descriptor.job_id,
                        JobStatus::Failed,
                        Some("insufficient_balance"),
                        None,
                    )
                    .await?;
            }
            return Ok(JobOutcome::InsufficientBalance);
        }
        probed
    } else {
        duration as f64
    };

    // Transcribe, selecting mode by duration
    let progress = ChatChunkProgress {
        chat: Arc::clone(&service.chat),
        chat_id,
        progress_message_id,
    };
    let (text, is_dialogue) =
        transcribe_stage(service, descriptor, &audio_path, actual_duration, &settings, temps, &progress)
            .await?;

    // Diarization debug dump for the admin
    if service.config.is_admin(chat_id) && settings.debug_mode {
        if let Some(dump) = service.engine.diarization_debug() {
            let _ = service
                .chat
                .send_message(
                    service.config.owner_id,
                    &format!("<pre>{dump}</pre>"),
                    ParseMode::Html,
                )
                .await;
        }
    }

    // Guard empties and the provider's no-speech sentinel
    if text.trim().is_empty() || text.trim() == NO_SPEECH_SENTINEL {
        service
            .chat
            .send_message(
                chat_id,
                "На записи не обнаружено речи или текст не был распознан.",
                ParseMode::Plain,
            )
            .await?;
        if progress_message_id != 0 {
            let _ = service.chat.delete_message(chat_id, progress_message_id).await;
        }
        if tracked {
            service
                .storage
                .update_job(&descriptor.job_id, JobStatus::Failed, Some("no_speech"), None)
                .await?;
        }
        return Ok(JobOutcome::NoSpeech);
    }

    // Format
    let formatted_text = format_stage(
        service,
        &text,
        is_dialogue,
        actual_duration,
        &settings,
        chat_id,
        progress_message_id,
    )
    .await;

    // Debit before delivery; accounting failure alerts the admin but never
    // suppresses a finished result
    let minutes = Job::minutes_for(duration);
    let balance_after = match service
        .storage
        .update_user_balance(descriptor.user_id, -minutes)
        .await
    {
        Ok(balance) => Some(balance),
        Err(e) => {
            log::error!(
                "[{trace}] CRITICAL: failed to deduct {minutes} min from user {}: {e}",
                descriptor.user_id
            );
            if service.config.owner_id != 0 {
                let _ = service
                    .chat
                    .send_message(
                        service.config.owner_id,
                        &format!(
                            "⚠️ Ошибка списания баланса!\nUser: {}\nМинут: {minutes}\nJob: {}\nТребуется ручная корректировка.",
                            descriptor.user_id, descriptor.job_id
                        ),
                        ParseMode::Plain,
                    )
                    .await;
            }
            None
        }
    };

    // Deliver
    deliver_result(service, chat_id, progress_message_id, &formatted_text, &settings).await?;

    // Log after delivery so it never adds to perceived latency
    service
        .storage
        .log_transcription(&TranscriptionLog::completed(
            descriptor.user_id,
            duration,
            formatted_text.chars().count() as i64,
        ))
        .await?;

    // Low-balance hints
    if let Some(balance) = balance_after {
        if balance == 0 {
            let _ = service
                .chat
                .send_message(
                    chat_id,
                    "❌ <b>Баланс исчерпан!</b>\nПополнить: /buy_minutes",
                    ParseMode::Html,
                )
                .await;
        } else if balance < LOW_BALANCE_WARNING_MINUTES {
            let _ = service
                .chat
                .send_message(
                    chat_id,
                    &format!(
                        "⚠️ <b>Низкий баланс!</b>\nОсталось: {balance} мин.\nПополнить: /buy_minutes"
                    ),
                    ParseMode::Html,
                )
                .await;
        }
    }

    if tracked {
        let result = format!("{{\"text_length\":{}}}", formatted_text.chars().count());
        service
            .storage
            .update_job(&descriptor.job_id, JobStatus::Completed, None, Some(&result))
            .await?;
    }

    log::info!("[{trace}] Job {} completed successfully", descriptor.job_id);
    Ok(JobOutcome::Completed)
}

/// Duration-routed transcription: two-pass diarization for long audio with
/// the dialogue gate, single/chunked ASR otherwise
async fn transcribe_stage(
    service: &Service,
    descriptor: &JobDescriptor,
    audio_path: &std::path::Path,
    actual_duration: f64,
    settings: &UserSettings,
    temps: &TempSet,
    progress: &ChatChunkProgress,
) -> Result<(String, bool)> {
    let trace = &descriptor.trace_id;
    let use_diarization = actual_duration >= DIARIZATION_THRESHOLD_SECS;
    log::info!(
        "[{trace}] [transcribe] mode={}, duration={actual_duration:.1}s",
        if use_diarization { "diarization" } else { "simple" }
    );

    if !use_diarization {
        let text = service.engine.transcribe(audio_path, temps, progress).await?;
        return Ok((text, false));
    }

    let diarized = service
        .engine
        .transcribe_with_diarization(audio_path, temps)
        .await?;

    if !diarized.segments.is_empty() {
        let speakers = unique_speakers(&diarized.segments);
        if speakers >= 2 {
            let transitions = speaker_transitions(&diarized.segments);
            if transitions >= MIN_DIALOGUE_TRANSITIONS {
                return Ok((
                    render_dialogue(&diarized.segments, settings.speaker_labels),
                    true,
                ));
            }
            // Too few transitions: almost certainly a misdetected monologue
            log::info!(
                "[{trace}] Diarization found {speakers} speakers but only {transitions} transitions, treating as monologue"
            );
        }
        let text = if diarized.text.trim().is_empty() {
            diarized
                .segments
                .iter()
                .map(|s| s.text.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            diarized.text
        };
        return Ok((text, false));
    }

    if !diarized.text.trim().is_empty() {
        return Ok((diarized.text, false));
    }

    // Diarization produced nothing: fall back to plain ASR
    log::warn!("[{trace}] Diarization yielded nothing, falling back to single-pass");
    let text = service.engine.transcribe(audio_path, temps, progress).await?;
    Ok((text, false))
}

/// Formatting stage; the formatter itself skips the LLM below ten words
async fn format_stage(
    service: &Service,
    text: &str,
    is_dialogue: bool,
    actual_duration: f64,
    settings: &UserSettings,
    chat_id: i64,
    progress_message_id: i64,
) -> String {
    if !too_short_to_format(text) {
        if progress_message_id != 0 {
            let label = if is_dialogue {
                "✏️ Форматирую диалог..."
            } else {
                "✏️ Форматирую текст..."
            };
            let _ = service
                .chat
                .edit_message_text(chat_id, progress_message_id, label, ParseMode::Plain)
                .await;
        }
        service.chat.send_chat_action(chat_id, "typing").await;
    }

    let options = FormatOptions {
        code_tags: settings.use_code_tags,
        use_yo: settings.use_yo,
        is_chunked: actual_duration > MAX_CHUNK_SECONDS as f64,
        is_dialogue,
    };
    // Dialogues default to the secondary provider, which formats them
    // better; the user's explicit backend choice still wins
    let preferred = if !settings.llm_backend.is_empty() {
        Some(settings.llm_backend.as_str())
    } else if is_dialogue {
        Some("gemini")
    } else {
        None
    };

    service.formatter.format(text, options, preferred).await
}

/// Poll the queue once; returns true when a message was handled
pub async fn poll_queue_once(service: &Service) -> Result<bool> {
    let Some(message) = service
        .queue
        .receive(
            &service.config.audio_jobs_queue,
            QUEUE_WAIT_SECS,
            QUEUE_VISIBILITY_SECS,
        )
        .await?
    else {
        return Ok(false);
    };

    log::info!(
        "Polled message {} (dequeue count {})",
        message.message_id,
        message.dequeue_count
    );

    let descriptor: JobDescriptor = serde_json::from_str(&message.body)?;
    let outcome = run_job(service, &descriptor).await?;

    if outcome.consumes_message() {
        delete_with_retries(service, &message.receipt_handle, &descriptor.job_id).await;
    }
    Ok(true)
}

/// Delete a consumed message; a failure after the retries is only logged —
/// the redelivery will be rejected by the dedup check
async fn delete_with_retries(service: &Service, receipt_handle: &str, job_id: &str) {
    for attempt in 0..DELETE_RETRIES {
        match service
            .queue
            .delete(&service.config.audio_jobs_queue, receipt_handle)
            .await
        {
            Ok(()) => {
                log::info!("Deleted queue message for job {job_id}");
                return;
            }
            Err(e) => {
                log::warn!(
                    "Queue delete attempt {}/{DELETE_RETRIES} failed: {e}",
                    attempt + 1
                );
                if attempt + 1 < DELETE_RETRIES {
                    tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                }
            }
        }
    }
    log::error!("Queue delete failed after {DELETE_RETRIES} attempts for job {job_id}, may be redelivered");
}

/// The worker loop: poll until shutdown
pub async fn run_worker_loop(service: Arc<Service>) {
    log::info!("Worker loop started on queue {}", service.config.audio_jobs_queue);
    loop {
        match poll_queue_once(&service).await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(Duration::from_secs(1)).await,
            Err(e) => {
                log::error!("Worker poll error: {e}");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}
