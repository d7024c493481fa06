//! Mock implementations for testing
//!
//! Hand-rolled recording mocks; every interaction is captured behind an
//! `Arc<Mutex<…>>` so tests can assert on the full call history.

use crate::domain::models::{
    Job, JobStatus, PaymentLog, Segment, TranscriptionLog, User, UserSettings,
};
use crate::error::{AppError, Result};
use crate::ports::asr::{AsrPort, AsyncTranscriptionPort, DiarizationPort, PassResult};
use crate::ports::chat::{ChatPort, InlineKeyboard, Invoice, ParseMode};
use crate::ports::llm::{LlmConfig, LlmPort};
use crate::ports::media::{MediaPort, TempSet, PROBE_FALLBACK_SECS};
use crate::ports::object_store::ObjectStorePort;
use crate::ports::queue::{QueuePort, ReceivedMessage};
use crate::ports::storage::StoragePort;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ===== Storage =====

/// Mock storage implementation for testing
#[derive(Clone, Default)]
pub struct MockStorage {
    pub users: Arc<Mutex<HashMap<i64, User>>>,
    pub jobs: Arc<Mutex<HashMap<String, Job>>>,
    pub transcription_logs: Arc<Mutex<Vec<TranscriptionLog>>>,
    pub payment_logs: Arc<Mutex<Vec<PaymentLog>>>,
    /// Number of balance updates that should fail with CAS exhaustion
    pub cas_failures: Arc<Mutex<u32>>,
    /// Record of applied balance deltas
    pub balance_deltas: Arc<Mutex<Vec<(i64, i64)>>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user_id: i64, balance: i64) -> Self {
        let mut user = User::with_trial(user_id, "Test", "", "tester");
        user.balance_minutes = balance;
        self.users.lock().unwrap().insert(user_id, user);
        self
    }

    pub fn set_user_settings(&self, user_id: i64, settings: UserSettings) {
        if let Some(user) = self.users.lock().unwrap().get_mut(&user_id) {
            user.settings = settings;
        }
    }

    /// Make the next `n` balance updates fail as CAS-exhausted
    pub fn fail_next_balance_updates(&self, n: u32) {
        *self.cas_failures.lock().unwrap() = n;
    }

    pub fn job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.lock().unwrap().get(job_id).map(|j| j.status)
    }
}

#[async_trait]
impl StoragePort for MockStorage {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(&user.user_id) {
            return Err(AppError::AlreadyExists(format!("user {}", user.user_id)));
        }
        users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn update_user_settings(&self, user_id: i64, settings: &UserSettings) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;
        user.settings = settings.clone();
        Ok(())
    }

    async fn update_user_balance(&self, user_id: i64, delta: i64) -> Result<i64> {
        {
            let mut failures = self.cas_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::BalanceCasExhausted(user_id));
            }
        }
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;
        user.balance_minutes = (user.balance_minutes + delta).max(0);
        self.balance_deltas.lock().unwrap().push((user_id, delta));
        Ok(user.balance_minutes)
    }

    async fn get_all_users(&self, limit: usize) -> Result<Vec<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(job_id).cloned())
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&job.job_id) {
            return Err(AppError::AlreadyExists(format!("job {}", job.job_id)));
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn update_job(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
        result: Option<&str>,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;
        job.status = status;
        if let Some(error) = error {
            job.error = Some(error.to_string());
        }
        if let Some(result) = result {
            job.result = Some(result.to_string());
        }
        Ok(())
    }

    async fn get_pending_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_stuck_jobs(&self, age_secs: i64, limit: usize) -> Result<Vec<Job>> {
        let cutoff = chrono::Utc::now().timestamp() - age_secs;
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| {
                matches!(j.status, JobStatus::Pending | JobStatus::Processing)
                    && j.created_at < cutoff
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        self.jobs.lock().unwrap().remove(job_id);
        Ok(())
    }

    async fn log_transcription(&self, log: &TranscriptionLog) -> Result<()> {
        self.transcription_logs.lock().unwrap().push(log.clone());
        Ok(())
    }

    async fn log_payment(&self, log: &PaymentLog) -> Result<()> {
        self.payment_logs.lock().unwrap().push(log.clone());
        Ok(())
    }
}

// ===== Chat =====

/// One outbound chat interaction, as recorded by `MockChat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Sent {
        chat_id: i64,
        message_id: i64,
        text: String,
        parse_mode: ParseMode,
    },
    Edited {
        chat_id: i64,
        message_id: i64,
        text: String,
        parse_mode: ParseMode,
    },
    Deleted {
        chat_id: i64,
        message_id: i64,
    },
    Document {
        chat_id: i64,
        text: String,
        caption: String,
    },
    Invoice {
        chat_id: i64,
        payload: String,
    },
    PreCheckout {
        query_id: String,
        ok: bool,
    },
}

/// Mock chat implementation recording every outbound interaction
#[derive(Clone, Default)]
pub struct MockChat {
    pub events: Arc<Mutex<Vec<ChatEvent>>>,
    next_message_id: Arc<Mutex<i64>>,
}

impl MockChat {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            next_message_id: Arc::new(Mutex::new(100)),
        }
    }

    fn next_id(&self) -> i64 {
        let mut id = self.next_message_id.lock().unwrap();
        *id += 1;
        *id
    }

    pub fn events(&self) -> Vec<ChatEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Last edit applied to the given message id
    pub fn last_edit_of(&self, message_id: i64) -> Option<String> {
        self.events()
            .into_iter()
            .rev()
            .find_map(|event| match event {
                ChatEvent::Edited {
                    message_id: id,
                    text,
                    ..
                } if id == message_id => Some(text),
                _ => None,
            })
    }

    pub fn sent_texts(&self, chat_id: i64) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ChatEvent::Sent {
                    chat_id: id, text, ..
                } if id == chat_id => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_message_ids(&self) -> Vec<i64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ChatEvent::Deleted { message_id, .. } => Some(message_id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatPort for MockChat {
    async fn send_message(&self, chat_id: i64, text: &str, parse_mode: ParseMode) -> Result<i64> {
        let message_id = self.next_id();
        self.events.lock().unwrap().push(ChatEvent::Sent {
            chat_id,
            message_id,
            text: text.to_string(),
            parse_mode,
        });
        Ok(message_id)
    }

    async fn send_message_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: ParseMode,
        _keyboard: &InlineKeyboard,
    ) -> Result<i64> {
        self.send_message(chat_id, text, parse_mode).await
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        parse_mode: ParseMode,
    ) -> Result<()> {
        self.events.lock().unwrap().push(ChatEvent::Edited {
            chat_id,
            message_id,
            text: text.to_string(),
            parse_mode,
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(ChatEvent::Deleted { chat_id, message_id });
        Ok(())
    }

    async fn send_chat_action(&self, _chat_id: i64, _action: &str) {}

    async fn get_file_path(&self, file_id: &str) -> Result<String> {
        Ok(format!("files/{file_id}.oga"))
    }

    async fn download_file(&self, file_path: &str) -> Result<PathBuf> {
        Ok(std::env::temp_dir().join(format!("mock_dl_{}", file_path.replace('/', "_"))))
    }

    async fn download_url(&self, url: &str) -> Result<PathBuf> {
        let name = url.rsplit('/').next().unwrap_or("download");
        Ok(std::env::temp_dir().join(format!("mock_url_{name}")))
    }

    async fn send_as_file(&self, chat_id: i64, text: &str, caption: &str) -> Result<()> {
        self.events.lock().unwrap().push(ChatEvent::Document {
            chat_id,
            text: text.to_string(),
            caption: caption.to_string(),
        });
        Ok(())
    }

    async fn send_invoice(&self, chat_id: i64, invoice: &Invoice) -> Result<()> {
        self.events.lock().unwrap().push(ChatEvent::Invoice {
            chat_id,
            payload: invoice.payload.clone(),
        });
        Ok(())
    }

    async fn answer_pre_checkout(&self, query_id: &str, ok: bool) -> Result<()> {
        self.events.lock().unwrap().push(ChatEvent::PreCheckout {
            query_id: query_id.to_string(),
            ok,
        });
        Ok(())
    }
}

// ===== Queue =====

/// Mock in-memory queue with receipt handles
#[derive(Clone, Default)]
pub struct MockQueue {
    pub messages: Arc<Mutex<VecDeque<(String, String)>>>,
    pub published: Arc<Mutex<Vec<String>>>,
    pub deleted: Arc<Mutex<Vec<String>>>,
    pub publish_fails: Arc<Mutex<bool>>,
    next_handle: Arc<Mutex<u64>>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publishes(&self) {
        *self.publish_fails.lock().unwrap() = true;
    }

    pub fn published_bodies(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }

    pub fn deleted_handles(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueuePort for MockQueue {
    async fn publish(&self, _queue: &str, body: &str) -> Result<String> {
        if *self.publish_fails.lock().unwrap() {
            return Err(AppError::Queue("publish refused".to_string()));
        }
        let mut handle = self.next_handle.lock().unwrap();
        *handle += 1;
        let id = format!("msg-{handle}");
        self.messages
            .lock()
            .unwrap()
            .push_back((id.clone(), body.to_string()));
        self.published.lock().unwrap().push(body.to_string());
        Ok(id)
    }

    async fn receive(
        &self,
        _queue: &str,
        _wait_secs: u32,
        _visibility_secs: u32,
    ) -> Result<Option<ReceivedMessage>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .pop_front()
            .map(|(id, body)| ReceivedMessage {
                body,
                receipt_handle: format!("rh-{id}"),
                message_id: id,
                dequeue_count: 1,
            }))
    }

    async fn delete(&self, _queue: &str, receipt_handle: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(receipt_handle.to_string());
        Ok(())
    }

    async fn change_visibility(
        &self,
        _queue: &str,
        receipt_handle: &str,
        _visibility_secs: u32,
    ) -> Result<String> {
        Ok(receipt_handle.to_string())
    }
}

// ===== ASR / diarization =====

/// Mock single-shot ASR returning scripted texts in order
#[derive(Clone, Default)]
pub struct MockAsr {
    /// Results popped per call; when exhausted, `fallback` is returned
    pub scripted: Arc<Mutex<VecDeque<Result<String>>>>,
    pub fallback: Arc<Mutex<String>>,
    pub calls: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockAsr {
    pub fn returning(text: &str) -> Self {
        let mock = Self::default();
        *mock.fallback.lock().unwrap() = text.to_string();
        mock
    }

    pub fn push_result(&self, result: Result<String>) {
        self.scripted.lock().unwrap().push_back(result);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AsrPort for MockAsr {
    async fn transcribe_file(&self, audio_path: &Path, _language: &str) -> Result<String> {
        self.calls.lock().unwrap().push(audio_path.to_path_buf());
        if let Some(result) = self.scripted.lock().unwrap().pop_front() {
            return result;
        }
        Ok(self.fallback.lock().unwrap().clone())
    }

    fn provider_name(&self) -> &str {
        "mock-asr"
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Mock two-pass transcription provider with scripted pass results
#[derive(Clone, Default)]
pub struct MockAsyncTranscription {
    pub speaker_result: Arc<Mutex<Option<Result<PassResult>>>>,
    pub text_result: Arc<Mutex<Option<Result<PassResult>>>>,
}

impl MockAsyncTranscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn speaker_segments(self, segments: Vec<Segment>) -> Self {
        *self.speaker_result.lock().unwrap() = Some(Ok(PassResult { segments }));
        self
    }

    pub fn text_segments(self, segments: Vec<Segment>) -> Self {
        *self.text_result.lock().unwrap() = Some(Ok(PassResult { segments }));
        self
    }

    pub fn speaker_fails(self) -> Self {
        *self.speaker_result.lock().unwrap() =
            Some(Err(AppError::AsrProvider("speaker pass failed".to_string())));
        self
    }

    pub fn text_fails(self) -> Self {
        *self.text_result.lock().unwrap() =
            Some(Err(AppError::AsrProvider("text pass failed".to_string())));
        self
    }
}

fn clone_pass_result(slot: &Mutex<Option<Result<PassResult>>>) -> Result<PassResult> {
    match &*slot.lock().unwrap() {
        Some(Ok(pass)) => Ok(PassResult {
            segments: pass.segments.clone(),
        }),
        Some(Err(e)) => Err(AppError::AsrProvider(e.to_string())),
        None => Ok(PassResult::default()),
    }
}

#[async_trait]
impl AsyncTranscriptionPort for MockAsyncTranscription {
    async fn speaker_pass(&self, _audio_url: &str) -> Result<PassResult> {
        clone_pass_result(&self.speaker_result)
    }

    async fn text_pass(&self, _audio_url: &str, _language: &str) -> Result<PassResult> {
        clone_pass_result(&self.text_result)
    }

    fn provider_name(&self) -> &str {
        "mock-two-pass"
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Mock one-call diarization provider
#[derive(Clone, Default)]
pub struct MockDiarization {
    pub segments: Arc<Mutex<Vec<Segment>>>,
    pub fails: Arc<Mutex<bool>>,
}

impl MockDiarization {
    pub fn returning(segments: Vec<Segment>) -> Self {
        Self {
            segments: Arc::new(Mutex::new(segments)),
            fails: Arc::new(Mutex::new(false)),
        }
    }
}

#[async_trait]
impl DiarizationPort for MockDiarization {
    async fn diarize_file(&self, _audio_path: &Path, _language: &str) -> Result<Vec<Segment>> {
        if *self.fails.lock().unwrap() {
            return Err(AppError::AsrProvider("diarization failed".to_string()));
        }
        Ok(self.segments.lock().unwrap().clone())
    }

    fn provider_name(&self) -> &str {
        "mock-diarization"
    }

    fn is_configured(&self) -> bool {
        true
    }
}

// ===== LLM =====

/// Mock LLM with a scripted response
#[derive(Clone, Default)]
pub struct MockLlm {
    pub response: Arc<Mutex<Option<String>>>,
    pub fails: Arc<Mutex<bool>>,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl MockLlm {
    pub fn returning(text: &str) -> Self {
        Self {
            response: Arc::new(Mutex::new(Some(text.to_string()))),
            fails: Arc::new(Mutex::new(false)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: Arc::new(Mutex::new(None)),
            fails: Arc::new(Mutex::new(true)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmPort for MockLlm {
    async fn generate(&self, prompt: &str, _config: &LlmConfig) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if *self.fails.lock().unwrap() {
            return Err(AppError::Llm("mock llm refused".to_string()));
        }
        Ok(self
            .response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| prompt.to_string()))
    }

    fn provider_name(&self) -> &str {
        "mock-llm"
    }

    fn is_configured(&self) -> bool {
        true
    }
}

// ===== Object store =====

/// Mock object store with deterministic signed URLs
#[derive(Clone, Default)]
pub struct MockObjectStore {
    pub puts: Arc<Mutex<Vec<(String, PathBuf)>>>,
    pub deletes: Arc<Mutex<Vec<String>>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStorePort for MockObjectStore {
    fn signed_put_url(&self, key: &str, _expires_in: Duration) -> Result<String> {
        Ok(format!("https://store.example/put/{key}"))
    }

    fn signed_get_url(&self, key: &str, _expires_in: Duration) -> Result<String> {
        Ok(format!("https://store.example/get/{key}"))
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        self.puts
            .lock()
            .unwrap()
            .push((key.to_string(), path.to_path_buf()));
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.deletes.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

// ===== Media =====

/// Mock media pipeline with a scripted duration and chunking
#[derive(Clone)]
pub struct MockMedia {
    pub duration_secs: Arc<Mutex<f64>>,
    /// When set, `split` returns these chunk paths
    pub chunks: Arc<Mutex<Option<Vec<PathBuf>>>>,
    pub prepare_calls: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockMedia {
    pub fn with_duration(duration_secs: f64) -> Self {
        Self {
            duration_secs: Arc::new(Mutex::new(duration_secs)),
            chunks: Arc::new(Mutex::new(None)),
            prepare_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_chunks(&self, chunks: Vec<PathBuf>) {
        *self.chunks.lock().unwrap() = Some(chunks);
    }
}

impl Default for MockMedia {
    fn default() -> Self {
        Self::with_duration(PROBE_FALLBACK_SECS)
    }
}

#[async_trait]
impl MediaPort for MockMedia {
    async fn prepare(&self, input: &Path, temps: &TempSet) -> Result<PathBuf> {
        self.prepare_calls.lock().unwrap().push(input.to_path_buf());
        let prepared = input.with_extension("prepared.mp3");
        temps.register(&prepared);
        Ok(prepared)
    }

    async fn duration(&self, _path: &Path) -> f64 {
        *self.duration_secs.lock().unwrap()
    }

    async fn split(&self, path: &Path, _chunk_secs: u32, temps: &TempSet) -> Vec<PathBuf> {
        match self.chunks.lock().unwrap().clone() {
            Some(chunks) => {
                for chunk in &chunks {
                    temps.register(chunk);
                }
                chunks
            }
            None => vec![path.to_path_buf()],
        }
    }
}
