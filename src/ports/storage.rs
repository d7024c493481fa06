/// Storage port trait
///
/// Typed operations over the state store. Contracts:
/// `create_*` fails on existing, `update_*` fails on missing, balance update
/// is a conditional write with bounded retries, range scans read with an
/// upper bound and filter client-side (no secondary indexes assumed).
use crate::domain::models::{Job, JobStatus, PaymentLog, TranscriptionLog, User, UserSettings};
use crate::error::Result;
use async_trait::async_trait;

/// Port trait for storage operations
#[async_trait]
pub trait StoragePort: Send + Sync {
    // User operations
    /// Get a user by id
    async fn get_user(&self, user_id: i64) -> Result<Option<User>>;

    /// Create a new user; fails if the user already exists
    async fn create_user(&self, user: &User) -> Result<()>;

    /// Replace a user's settings map
    async fn update_user_settings(&self, user_id: i64, settings: &UserSettings) -> Result<()>;

    /// Adjust a user's balance by `delta` minutes with optimistic
    /// concurrency: the write succeeds only if the balance still equals the
    /// value observed at read time. Retries on conflict; returns the new
    /// balance, or `BalanceCasExhausted` after the retries run out.
    async fn update_user_balance(&self, user_id: i64, delta: i64) -> Result<i64>;

    /// Bounded scan over users, filtered client-side
    async fn get_all_users(&self, limit: usize) -> Result<Vec<User>>;

    // Job operations
    /// Get a job by id
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

    /// Create a new job row; fails if the id already exists (dedup by id)
    async fn create_job(&self, job: &Job) -> Result<()>;

    /// Update status and optional error/result on an existing job
    async fn update_job(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
        result: Option<&str>,
    ) -> Result<()>;

    /// Jobs still pending, bounded scan
    async fn get_pending_jobs(&self, limit: usize) -> Result<Vec<Job>>;

    /// Jobs stuck in pending/processing older than `age_secs`
    async fn get_stuck_jobs(&self, age_secs: i64, limit: usize) -> Result<Vec<Job>>;

    /// Delete a job row
    async fn delete_job(&self, job_id: &str) -> Result<()>;

    // Log operations
    /// Append a transcription log row
    async fn log_transcription(&self, log: &TranscriptionLog) -> Result<()>;

    /// Append a payment log row
    async fn log_payment(&self, log: &PaymentLog) -> Result<()>;
}
