/// SQLite storage adapter
///
/// Implements StoragePort with the C5 contracts: creates fail on existing
/// rows, updates fail on missing rows, the balance update is a conditional
/// write with bounded retries, and scans read bounded then filter
/// client-side.
use crate::domain::models::{
    FileKind, Job, JobStatus, PaymentLog, TranscriptionLog, User, UserSettings,
};
use crate::error::{AppError, Result};
use crate::ports::storage::StoragePort;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Conditional balance update attempts before giving up
const BALANCE_CAS_ATTEMPTS: u32 = 3;
/// Linear backoff base between attempts
const BALANCE_CAS_BACKOFF_MS: u64 = 100;

/// SQLite storage implementation
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory storage for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run database migrations
    pub fn run_migrations(&self) -> Result<()> {
        use rusqlite_migration::{Migrations, M};

        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../../migrations/001_initial.sql"
        ))]);

        let mut conn = self.conn.lock().unwrap();
        migrations
            .to_latest(&mut conn)
            .map_err(|e| AppError::Database(rusqlite::Error::ToSqlConversionFailure(Box::new(e))))?;

        Ok(())
    }

    fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
        let settings_json: String = row.get(6)?;
        Ok(User {
            user_id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            username: row.get(3)?,
            balance_minutes: row.get(4)?,
            trial_status: row.get(5)?,
            settings: UserSettings::from_json(&settings_json),
            created_at: row.get(7)?,
            last_activity: row.get(8)?,
        })
    }

    fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
        let status: String = row.get(6)?;
        let kind: String = row.get(4)?;
        Ok(Job {
            job_id: row.get(0)?,
            user_id: row.get(1)?,
            chat_id: row.get(2)?,
            file_ref: row.get(3)?,
            file_kind: serde_json::from_value(serde_json::Value::String(kind))
                .unwrap_or(FileKind::Document),
            duration: row.get(5)?,
            status: status.parse().unwrap_or(JobStatus::Failed),
            status_message_id: row.get(7)?,
            trace_id: row.get(8)?,
            error: row.get(9)?,
            result: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn kind_str(kind: FileKind) -> String {
        serde_json::to_value(kind)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_else(|| "document".to_string())
    }

    const USER_COLUMNS: &'static str = "user_id, first_name, last_name, username, \
         balance_minutes, trial_status, settings, created_at, last_activity";

    const JOB_COLUMNS: &'static str = "job_id, user_id, chat_id, file_ref, file_kind, duration, \
         status, status_message_id, trace_id, error, result, created_at";
}

#[async_trait]
impl StoragePort for SqliteStorage {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE user_id = ?1", Self::USER_COLUMNS),
                params![user_id],
                Self::row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users \
             (user_id, first_name, last_name, username, balance_minutes, trial_status, settings, created_at, last_activity) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user.user_id,
                user.first_name,
                user.last_name,
                user.username,
                user.balance_minutes,
                user.trial_status,
                user.settings.to_json(),
                user.created_at,
                user.last_activity,
            ],
        )?;
        if inserted == 0 {
            return Err(AppError::AlreadyExists(format!("user {}", user.user_id)));
        }
        Ok(())
    }

    async fn update_user_settings(&self, user_id: i64, settings: &UserSettings) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE users SET settings = ?2, last_activity = ?3 WHERE user_id = ?1",
            params![user_id, settings.to_json(), chrono::Utc::now().timestamp()],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn update_user_balance(&self, user_id: i64, delta: i64) -> Result<i64> {
        for attempt in 1..=BALANCE_CAS_ATTEMPTS {
            let outcome = {
                let conn = self.conn.lock().unwrap();
                let observed: Option<i64> = conn
                    .query_row(
                        "SELECT balance_minutes FROM users WHERE user_id = ?1",
                        params![user_id],
                        |row| row.get(0),
                    )
                    .optional()?;

                let Some(observed) = observed else {
                    return Err(AppError::NotFound(format!("user {user_id}")));
                };

                let new_balance = (observed + delta).max(0);
                // The write lands only if nothing raced between read and
                // write; a NULL balance (never-credited row) passes too
                let updated = conn.execute(
                    "UPDATE users SET balance_minutes = ?2, last_activity = ?3 \
                     WHERE user_id = ?1 AND (balance_minutes = ?4 OR balance_minutes IS NULL)",
                    params![
                        user_id,
                        new_balance,
                        chrono::Utc::now().timestamp(),
                        observed
                    ],
                )?;
                if updated == 1 {
                    Some(new_balance)
                } else {
                    None
                }
            };

            match outcome {
                Some(new_balance) => {
                    log::info!(
                        "Updated balance for user {user_id}: delta {delta:+} -> {new_balance}"
                    );
                    return Ok(new_balance);
                }
                None => {
                    log::warn!(
                        "Balance update conflict for user {user_id}, attempt {attempt}/{BALANCE_CAS_ATTEMPTS}"
                    );
                    if attempt < BALANCE_CAS_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(
                            BALANCE_CAS_BACKOFF_MS * attempt as u64,
                        ))
                        .await;
                    }
                }
            }
        }

        log::error!("Balance update failed after {BALANCE_CAS_ATTEMPTS} retries for user {user_id}");
        Err(AppError::BalanceCasExhausted(user_id))
    }

    async fn get_all_users(&self, limit: usize) -> Result<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users LIMIT ?1",
            Self::USER_COLUMNS
        ))?;
        let users = stmt
            .query_map(params![limit as i64], Self::row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!(
                    "SELECT {} FROM audio_jobs WHERE job_id = ?1",
                    Self::JOB_COLUMNS
                ),
                params![job_id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO audio_jobs \
             (job_id, user_id, chat_id, file_ref, file_kind, duration, status, status_message_id, trace_id, error, result, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.job_id,
                job.user_id,
                job.chat_id,
                job.file_ref,
                Self::kind_str(job.file_kind),
                job.duration,
                job.status.to_string(),
                job.status_message_id,
                job.trace_id,
                job.error,
                job.result,
                job.created_at,
            ],
        )?;
        if inserted == 0 {
            return Err(AppError::AlreadyExists(format!("job {}", job.job_id)));
        }
        Ok(())
    }

    async fn update_job(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
        result: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE audio_jobs SET status = ?2, \
             error = COALESCE(?3, error), result = COALESCE(?4, result) \
             WHERE job_id = ?1",
            params![job_id, status.to_string(), error, result],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("job {job_id}")));
        }
        Ok(())
    }

    async fn get_pending_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM audio_jobs ORDER BY created_at DESC LIMIT ?1",
            Self::JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![(limit * 4) as i64], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        // Bounded read, filtered client-side
        Ok(jobs
            .into_iter()
            .filter(|j| j.status == JobStatus::Pending)
            .take(limit)
            .collect())
    }

    async fn get_stuck_jobs(&self, age_secs: i64, limit: usize) -> Result<Vec<Job>> {
        let cutoff = chrono::Utc::now().timestamp() - age_secs;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM audio_jobs ORDER BY created_at ASC LIMIT ?1",
            Self::JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![(limit * 4) as i64], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs
            .into_iter()
            .filter(|j| {
                matches!(j.status, JobStatus::Pending | JobStatus::Processing)
                    && j.created_at < cutoff
            })
            .take(limit)
            .collect())
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM audio_jobs WHERE job_id = ?1", params![job_id])?;
        Ok(())
    }

    async fn log_transcription(&self, log: &TranscriptionLog) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO transcription_logs (user_id, duration, char_count, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                log.user_id,
                log.duration,
                log.char_count,
                log.status,
                log.created_at
            ],
        )?;
        Ok(())
    }

    async fn log_payment(&self, log: &PaymentLog) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO payment_logs (user_id, payload, stars_amount, minutes, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                log.user_id,
                log.payload,
                log.stars_amount,
                log.minutes,
                log.created_at
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> SqliteStorage {
        let storage = SqliteStorage::in_memory().unwrap();
        storage.run_migrations().unwrap();
        storage
    }

    #[tokio::test]
    async fn test_user_roundtrip() {
        let storage = storage();
        let user = User::with_trial(12345, "Иван", "Петров", "ivan");
        storage.create_user(&user).await.unwrap();

        let loaded = storage.get_user(12345).await.unwrap().unwrap();
        assert_eq!(loaded.first_name, "Иван");
        assert_eq!(loaded.balance_minutes, 15);
        assert!(loaded.settings.use_yo);
    }

    #[tokio::test]
    async fn test_create_user_fails_on_existing() {
        let storage = storage();
        let user = User::with_trial(1, "A", "", "");
        storage.create_user(&user).await.unwrap();
        let result = storage.create_user(&user).await;
        assert!(matches!(result, Err(AppError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_balance_debit_and_floor() {
        let storage = storage();
        storage
            .create_user(&User::with_trial(1, "A", "", ""))
            .await
            .unwrap();

        let balance = storage.update_user_balance(1, -2).await.unwrap();
        assert_eq!(balance, 13);

        // Deducting past zero clamps
        let balance = storage.update_user_balance(1, -100).await.unwrap();
        assert_eq!(balance, 0);

        let balance = storage.update_user_balance(1, 50).await.unwrap();
        assert_eq!(balance, 50);
    }

    #[tokio::test]
    async fn test_balance_update_missing_user() {
        let storage = storage();
        let result = storage.update_user_balance(99, -1).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_job_roundtrip_and_dedup() {
        let storage = storage();
        let job = Job::new(1, 2, "file-x", FileKind::Voice, 120, 42, "trace01");
        storage.create_job(&job).await.unwrap();

        let result = storage.create_job(&job).await;
        assert!(matches!(result, Err(AppError::AlreadyExists(_))));

        let loaded = storage.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.file_kind, FileKind::Voice);
        assert_eq!(loaded.status_message_id, 42);
        assert_eq!(loaded.trace_id, "trace01");
    }

    #[tokio::test]
    async fn test_update_job_preserves_error_on_none() {
        let storage = storage();
        let job = Job::new(1, 2, "f", FileKind::Audio, 60, 0, "t");
        storage.create_job(&job).await.unwrap();

        storage
            .update_job(&job.job_id, JobStatus::Failed, Some("no_speech"), None)
            .await
            .unwrap();
        storage
            .update_job(&job.job_id, JobStatus::Failed, None, None)
            .await
            .unwrap();

        let loaded = storage.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(loaded.error.as_deref(), Some("no_speech"));
    }

    #[tokio::test]
    async fn test_update_missing_job_fails() {
        let storage = storage();
        let result = storage
            .update_job("missing", JobStatus::Completed, None, None)
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_stuck_jobs_filter() {
        let storage = storage();
        let mut stale = Job::new(1, 2, "f", FileKind::Voice, 60, 0, "t");
        stale.created_at -= 7200;
        storage.create_job(&stale).await.unwrap();
        storage
            .update_job(&stale.job_id, JobStatus::Processing, None, None)
            .await
            .unwrap();

        let fresh = Job::new(1, 2, "g", FileKind::Voice, 60, 0, "t");
        storage.create_job(&fresh).await.unwrap();

        let mut done = Job::new(1, 2, "h", FileKind::Voice, 60, 0, "t");
        done.created_at -= 7200;
        storage.create_job(&done).await.unwrap();
        storage
            .update_job(&done.job_id, JobStatus::Completed, None, None)
            .await
            .unwrap();

        let stuck = storage.get_stuck_jobs(3600, 10).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].job_id, stale.job_id);
    }

    #[tokio::test]
    async fn test_transcription_log_append() {
        let storage = storage();
        storage
            .log_transcription(&TranscriptionLog::completed(1, 120, 456))
            .await
            .unwrap();
        // Append-only: a second row for the same user is a new row
        storage
            .log_transcription(&TranscriptionLog::completed(1, 60, 123))
            .await
            .unwrap();
    }
}
