//! Orphaned-job recovery
//!
//! A crashed worker leaves its job in pending/processing forever (dedup then
//! skips the redelivery). The sweep fails such jobs after an hour and credits
//! the billed minutes back to the owner.

use super::{Service, STUCK_JOB_AGE_SECS};
use crate::domain::models::{Job, JobStatus};
use crate::error::Result;
use crate::ports::chat::ParseMode;

const SWEEP_SCAN_LIMIT: usize = 50;

/// Outcome of one sweep run
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub failed: usize,
    pub minutes_refunded: i64,
}

/// Walk the job table for stale pending/processing rows, fail each and
/// refund its minutes. Invoked by the admin command and optionally a timer.
pub async fn recover_orphaned_jobs(service: &Service) -> Result<SweepReport> {
    let stuck = service
        .storage
        .get_stuck_jobs(STUCK_JOB_AGE_SECS, SWEEP_SCAN_LIMIT)
        .await?;

    let mut report = SweepReport::default();
    for job in stuck {
        match sweep_one(service, &job).await {
            Ok(minutes) => {
                report.failed += 1;
                report.minutes_refunded += minutes;
            }
            Err(e) => log::error!("[{}] Sweep failed for job {}: {e}", job.trace_id, job.job_id),
        }
    }

    if report.failed > 0 {
        log::info!(
            "Sweep recovered {} orphaned jobs, {} minutes refunded",
            report.failed,
            report.minutes_refunded
        );
    }
    Ok(report)
}

async fn sweep_one(service: &Service, job: &Job) -> Result<i64> {
    service
        .storage
        .update_job(&job.job_id, JobStatus::Failed, Some("orphaned"), None)
        .await?;

    let minutes = Job::minutes_for(job.duration);
    if minutes > 0 {
        service.storage.update_user_balance(job.user_id, minutes).await?;
    }

    // The user has been staring at a stale progress message
    if job.status_message_id != 0 {
        let _ = service
            .chat
            .edit_message_text(
                job.chat_id,
                job.status_message_id,
                "Обработка не была завершена. Минуты возвращены на баланс.",
                ParseMode::Plain,
            )
            .await;
    }

    Ok(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testkit::TestHarnessBuilder;
    use crate::domain::models::FileKind;

    #[tokio::test]
    async fn test_sweep_fails_and_refunds_stale_jobs() {
        let builder = TestHarnessBuilder::new();
        let storage = builder.storage.clone().with_user(12345, 10);
        let builder = TestHarnessBuilder { storage, ..builder };
        let harness = builder.build();

        let mut stale = Job::new(12345, 67890, "file-x", FileKind::Audio, 120, 42, "trace01");
        stale.created_at -= 2 * STUCK_JOB_AGE_SECS;
        harness.storage.jobs.lock().unwrap().insert(stale.job_id.clone(), {
            let mut job = stale.clone();
            job.status = JobStatus::Processing;
            job
        });

        let report = recover_orphaned_jobs(&harness.service).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.minutes_refunded, 2);

        assert_eq!(
            harness.storage.job_status(&stale.job_id),
            Some(JobStatus::Failed)
        );
        let user = harness.storage.users.lock().unwrap()[&12345].clone();
        assert_eq!(user.balance_minutes, 12);
        assert!(harness.chat.last_edit_of(42).is_some());
    }

    #[tokio::test]
    async fn test_sweep_ignores_fresh_jobs() {
        let harness = TestHarnessBuilder::new().build();
        let fresh = Job::new(1, 2, "f", FileKind::Voice, 60, 0, "t");
        harness
            .storage
            .jobs
            .lock()
            .unwrap()
            .insert(fresh.job_id.clone(), fresh.clone());

        let report = recover_orphaned_jobs(&harness.service).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(
            harness.storage.job_status(&fresh.job_id),
            Some(JobStatus::Pending)
        );
    }
}
