//! Webhook ingress
//!
//! Accepts one chat update, ensures the user exists, applies the rate limit,
//! and routes media to the sync or async execution path.

use super::update::{CallbackQuery, Message, Update};
use super::worker::{self, JobOutcome};
use super::{cloud_drive, commands, payments, Service, SYNC_THRESHOLD_SECS};
use crate::domain::models::{FileKind, Job, JobDescriptor, JobStatus, User};
use crate::domain::packages;
use crate::error::Result;
use crate::ports::chat::ParseMode;
use std::time::Duration;

/// Process one webhook update; the returned token is echoed in the HTTP
/// response body and otherwise only useful in logs
pub async fn handle_update(service: &Service, update: Update) -> &'static str {
    let trace_id = super::new_trace_id();

    // Rate limiting (admin bypasses so operations never lock themselves out)
    if let Some(user_id) = update.user_id() {
        if !service.config.is_admin(user_id) && service.rate_limiter.is_limited(user_id) {
            log::warn!("[{trace_id}] Rate limited user {user_id}");
            return "rate_limited";
        }
    }

    let result = dispatch_update(service, &update, &trace_id).await;
    match result {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("[{trace_id}] Error processing update: {e}");
            "error"
        }
    }
}

async fn dispatch_update(
    service: &Service,
    update: &Update,
    trace_id: &str,
) -> Result<&'static str> {
    if let Some(callback) = &update.callback_query {
        return handle_callback(service, callback).await;
    }

    if let Some(query) = &update.pre_checkout_query {
        return payments::handle_pre_checkout(service, query).await;
    }

    if let Some(message) = &update.message {
        let Some(user_id) = message.user_id() else {
            return Ok("no_user");
        };

        if let Some(payment) = &message.successful_payment {
            return payments::handle_successful_payment(
                service,
                user_id,
                message.chat.id,
                payment,
            )
            .await;
        }

        let user = ensure_user(service, message, user_id).await?;

        if message.media().is_some() {
            return handle_audio_message(service, message, &user, trace_id).await;
        }

        let text = message.text.clone().unwrap_or_default();
        if text.starts_with('/') {
            return commands::handle_command(service, message, &user).await;
        }

        if let Some(provider) = cloud_drive::detect(&text) {
            return handle_url_import(service, message, &user, provider, text.trim(), trace_id)
                .await;
        }

        return Ok("message_received");
    }

    Ok("no_action")
}

/// Look up the user, creating them with the trial grant on first contact
async fn ensure_user(service: &Service, message: &Message, user_id: i64) -> Result<User> {
    if let Some(user) = service.storage.get_user(user_id).await? {
        return Ok(user);
    }

    let from = message.from.clone().unwrap_or_default();
    let user = User::with_trial(user_id, &from.first_name, &from.last_name, &from.username);
    service.storage.create_user(&user).await?;
    log::info!("Created user {user_id} with trial grant");

    if service.config.owner_id != 0 {
        let keyboard = vec![vec![(
            "❌ Отозвать триал".to_string(),
            format!("revoke_trial_{user_id}"),
        )]];
        let notify = service
            .chat
            .send_message_with_keyboard(
                service.config.owner_id,
                &format!(
                    "🆕 Новый пользователь: {} (ID: {user_id})\n✅ Авто-триал: {} мин",
                    user.display_name(),
                    user.balance_minutes
                ),
                ParseMode::Plain,
                &keyboard,
            )
            .await;
        if let Err(e) = notify {
            log::warn!("Failed to notify owner about new user {user_id}: {e}");
        }
    }

    Ok(user)
}

/// Route an inbound media message
async fn handle_audio_message(
    service: &Service,
    message: &Message,
    user: &User,
    trace_id: &str,
) -> Result<&'static str> {
    let chat_id = message.chat.id;
    let (file_id, duration, kind) = message.media().expect("caller checked media presence");

    // Balance pre-check. Zero-duration items (documents, uploads) get
    // provisional acceptance and a re-check after the probe.
    let minutes = Job::minutes_for(duration);
    if duration > 0 && user.balance_minutes < minutes {
        send_balance_suggestion(service, chat_id, minutes, user.balance_minutes).await?;
        return Ok("insufficient_balance");
    }

    let status_message_id = service
        .chat
        .send_message(chat_id, "🎙 Аудио получено. Обрабатываю...", ParseMode::Plain)
        .await
        .unwrap_or(0);

    let descriptor = JobDescriptor {
        job_id: uuid::Uuid::new_v4().to_string(),
        user_id: user.user_id,
        chat_id,
        file_ref: file_id,
        file_kind: kind,
        duration,
        status_message_id,
        trace_id: trace_id.to_string(),
    };

    // Short audio answers inline; anything longer takes the queue (which is
    // also the only path where diarization can run)
    if duration >= SYNC_THRESHOLD_SECS {
        queue_audio_async(service, descriptor).await
    } else {
        log::info!("[{trace_id}] [routing] sync=true, duration={duration}s, user={}", user.user_id);
        match worker::run_sync(service, &descriptor).await? {
            JobOutcome::Completed => Ok("transcribed_sync"),
            JobOutcome::InsufficientBalance => Ok("insufficient_balance"),
            JobOutcome::NoSpeech => Ok("no_speech"),
            _ => Ok("error"),
        }
    }
}

/// Purchase hint listing the smallest covering package
async fn send_balance_suggestion(
    service: &Service,
    chat_id: i64,
    minutes_needed: i64,
    balance: i64,
) -> Result<()> {
    let deficit = minutes_needed - balance;
    let mut text = format!(
        "⏱ Аудио: ~{minutes_needed} мин\n💰 Ваш баланс: {balance} мин\n📊 Не хватает: {deficit} мин\n\n"
    );
    if let Some(package) = packages::recommend_for_deficit(deficit) {
        text.push_str(&format!(
            "Рекомендуем: <b>{}</b> ({} мин за {}⭐)\n",
            package.title, package.minutes, package.stars_amount
        ));
    }
    text.push_str("\n/buy_minutes — все пакеты");
    service.chat.send_message(chat_id, &text, ParseMode::Html).await?;
    Ok(())
}

/// Persist the job and hand it to the async machinery: direct worker
/// invocation first, queue second, inline degradation last
pub(crate) async fn queue_audio_async(
    service: &Service,
    descriptor: JobDescriptor,
) -> Result<&'static str> {
    let trace_id = descriptor.trace_id.clone();
    let mut job = Job::new(
        descriptor.user_id,
        descriptor.chat_id,
        &descriptor.file_ref,
        descriptor.file_kind,
        descriptor.duration,
        descriptor.status_message_id,
        &trace_id,
    );
    job.job_id = descriptor.job_id.clone();
    service.storage.create_job(&job).await?;
    log::info!(
        "[{trace_id}] [routing] sync=false, duration={}s, user={}, job={}",
        descriptor.duration,
        descriptor.user_id,
        descriptor.job_id
    );

    // Primary: fire-and-forget HTTP invocation of the worker. The read
    // timeout is intentionally short — the worker's full execution exceeds
    // any reasonable HTTP wait, so timing out while it runs is the expected
    // success shape.
    if !service.config.worker_url.is_empty() {
        let invoke = service
            .http
            .post(&service.config.worker_url)
            .timeout(Duration::from_secs(2))
            .json(&descriptor)
            .send()
            .await;
        match invoke {
            Ok(_) => {
                log::info!("[{trace_id}] HTTP invoked worker for job {}", descriptor.job_id);
                return notify_queued(service, &descriptor, "⏳ Обрабатываю аудио...").await;
            }
            Err(e) if e.is_timeout() => {
                log::info!(
                    "[{trace_id}] HTTP invoked worker for job {} (fire-and-forget)",
                    descriptor.job_id
                );
                return notify_queued(service, &descriptor, "⏳ Обрабатываю аудио...").await;
            }
            Err(e) => {
                log::error!("[{trace_id}] HTTP invoke failed for job {}: {e}", descriptor.job_id);
            }
        }
    }

    // Fallback: the at-least-once queue
    let body = serde_json::to_string(&descriptor)?;
    match service
        .queue
        .publish(&service.config.audio_jobs_queue, &body)
        .await
    {
        Ok(_) => {
            log::info!("[{trace_id}] Published job {} to queue", descriptor.job_id);
            return notify_queued(service, &descriptor, "⏳ Аудио в очереди на обработку...").await;
        }
        Err(e) => {
            log::error!("[{trace_id}] Queue publish failed for job {}: {e}", descriptor.job_id);
        }
    }

    // Last resort: degrade to synchronous execution (no diarization there)
    log::warn!(
        "[{trace_id}] All async methods failed for job {}, using sync fallback",
        descriptor.job_id
    );
    if let Err(e) = service
        .storage
        .update_job(&descriptor.job_id, JobStatus::Failed, Some("async_unavailable"), None)
        .await
    {
        log::warn!("[{trace_id}] Failed to record degradation on job {}: {e}", descriptor.job_id);
    }
    worker::run_sync(service, &descriptor).await?;
    Ok("sync_fallback")
}

async fn notify_queued(
    service: &Service,
    descriptor: &JobDescriptor,
    text: &str,
) -> Result<&'static str> {
    if descriptor.status_message_id != 0 {
        let _ = service
            .chat
            .edit_message_text(
                descriptor.chat_id,
                descriptor.status_message_id,
                text,
                ParseMode::Plain,
            )
            .await;
    }
    Ok("queued")
}

/// Cloud-drive import: resolve the share URL, then take the async path with
/// the direct URL as the file reference
async fn handle_url_import(
    service: &Service,
    message: &Message,
    user: &User,
    provider: cloud_drive::DriveProvider,
    url: &str,
    trace_id: &str,
) -> Result<&'static str> {
    let chat_id = message.chat.id;
    let direct_url = match cloud_drive::resolve(&service.http, provider, url).await {
        Ok(direct) => direct,
        Err(e) => {
            log::warn!("[{trace_id}] Cloud drive resolve failed: {e}");
            service
                .chat
                .send_message(
                    chat_id,
                    "Не удалось получить файл по ссылке. Проверьте, что доступ открыт.",
                    ParseMode::Plain,
                )
                .await?;
            return Ok("url_resolve_failed");
        }
    };

    let status_message_id = service
        .chat
        .send_message(chat_id, "🎙 Файл получен. Обрабатываю...", ParseMode::Plain)
        .await
        .unwrap_or(0);

    let descriptor = JobDescriptor {
        job_id: uuid::Uuid::new_v4().to_string(),
        user_id: user.user_id,
        chat_id,
        file_ref: direct_url,
        file_kind: FileKind::Url,
        duration: 0,
        status_message_id,
        trace_id: trace_id.to_string(),
    };
    queue_audio_async(service, descriptor).await
}

/// Inline keyboard callbacks: trial revocation and package purchase
async fn handle_callback(service: &Service, callback: &CallbackQuery) -> Result<&'static str> {
    let data = callback.data.as_str();

    if let Some(target) = data.strip_prefix("revoke_trial_") {
        if !service.config.is_admin(callback.from.id) {
            return Ok("unauthorized");
        }
        let Ok(target_id) = target.parse::<i64>() else {
            return Ok("bad_callback");
        };
        let balance = service
            .storage
            .get_user(target_id)
            .await?
            .map(|u| u.balance_minutes)
            .unwrap_or(0);
        if balance > 0 {
            service.storage.update_user_balance(target_id, -balance).await?;
        }
        service
            .chat
            .send_message(
                service.config.owner_id,
                &format!("Триал пользователя {target_id} отозван."),
                ParseMode::Plain,
            )
            .await?;
        return Ok("trial_revoked");
    }

    if let Some(package_id) = data.strip_prefix("buy_") {
        let Some(package) = packages::PACKAGES.iter().find(|p| p.id == package_id) else {
            return Ok("bad_callback");
        };
        let chat_id = callback
            .message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(callback.from.id);
        service
            .chat
            .send_invoice(
                chat_id,
                &crate::ports::chat::Invoice {
                    title: package.title.to_string(),
                    description: package.description.to_string(),
                    payload: package.payload.to_string(),
                    stars_amount: package.stars_amount,
                },
            )
            .await?;
        return Ok("invoice_sent");
    }

    Ok("callback_ignored")
}
