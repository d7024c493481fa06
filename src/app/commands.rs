//! Bot command dispatch
//!
//! User commands toggle settings and start the purchase flow; admin commands
//! cover crediting, stats and recovery. Unauthorized admin commands answer
//! nothing beyond the unknown-command hint.

use super::update::Message;
use super::{payments, sweep, Service};
use crate::domain::models::User;
use crate::error::Result;
use crate::ports::chat::ParseMode;

/// Dispatch a `/command` message
pub async fn handle_command(
    service: &Service,
    message: &Message,
    user: &User,
) -> Result<&'static str> {
    let chat_id = message.chat.id;
    let text = message.text.clone().unwrap_or_default();
    let command = text
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .split('@')
        .next()
        .unwrap_or_default()
        .to_lowercase();

    match command.as_str() {
        "/start" => cmd_start(service, chat_id, user).await,
        "/help" => cmd_help(service, chat_id).await,
        "/balance" => cmd_balance(service, chat_id, user).await,
        "/settings" => cmd_settings(service, chat_id, user).await,
        "/code" => toggle_setting(service, chat_id, user, "code").await,
        "/yo" => toggle_setting(service, chat_id, user, "yo").await,
        "/output" => toggle_setting(service, chat_id, user, "output").await,
        "/speakers" => toggle_setting(service, chat_id, user, "speakers").await,
        "/buy_minutes" => {
            payments::send_package_menu(service, chat_id).await?;
            Ok("buy_menu")
        }
        "/upload" => cmd_upload(service, chat_id).await,
        // Admin surface
        "/credit" | "/stat" | "/status" | "/flush" | "/debug" | "/llm" => {
            if !service.config.is_admin(user.user_id) {
                return Ok("unauthorized");
            }
            handle_admin_command(service, chat_id, user, &command, &text).await
        }
        _ => {
            service
                .chat
                .send_message(
                    chat_id,
                    "Неизвестная команда. Используйте /help для справки.",
                    ParseMode::Plain,
                )
                .await?;
            Ok("unknown_command")
        }
    }
}

async fn cmd_start(service: &Service, chat_id: i64, user: &User) -> Result<&'static str> {
    service
        .chat
        .send_message(
            chat_id,
            &format!(
                "👋 Привет! Отправьте голосовое сообщение, аудио или видео — я превращу его в текст.\n\n\
                 ▸ Файлы до 500 МБ через /upload\n\
                 ▸ Ссылки на Яндекс.Диск, Dropbox и Google Drive тоже работают\n\n\
                 💰 Ваш баланс: {} мин.",
                user.balance_minutes
            ),
            ParseMode::Plain,
        )
        .await?;
    Ok("start")
}

async fn cmd_help(service: &Service, chat_id: i64) -> Result<&'static str> {
    service
        .chat
        .send_message(
            chat_id,
            "Команды:\n\
             /balance — баланс минут\n\
             /buy_minutes — купить минуты\n\
             /upload — загрузка больших файлов (до 500 МБ)\n\
             /settings — текущие настройки\n\
             /code — моноширинный шрифт вкл/выкл\n\
             /yo — буква ё вкл/выкл\n\
             /output — длинный текст: сообщения или файл\n\
             /speakers — подписи спикеров в диалогах",
            ParseMode::Plain,
        )
        .await?;
    Ok("help")
}

async fn cmd_balance(service: &Service, chat_id: i64, user: &User) -> Result<&'static str> {
    service
        .chat
        .send_message(
            chat_id,
            &format!("💰 Ваш баланс: {} мин.", user.balance_minutes),
            ParseMode::Plain,
        )
        .await?;
    Ok("balance")
}

async fn cmd_settings(service: &Service, chat_id: i64, user: &User) -> Result<&'static str> {
    let s = &user.settings;
    let on_off = |enabled: bool| if enabled { "вкл" } else { "выкл" };
    service
        .chat
        .send_message(
            chat_id,
            &format!(
                "Настройки:\n\
                 ▸ Моноширинный шрифт (/code): {}\n\
                 ▸ Буква ё (/yo): {}\n\
                 ▸ Длинный текст (/output): {}\n\
                 ▸ Подписи спикеров (/speakers): {}",
                on_off(s.use_code_tags),
                on_off(s.use_yo),
                if s.wants_file_output() { "файлом" } else { "сообщениями" },
                on_off(s.speaker_labels),
            ),
            ParseMode::Plain,
        )
        .await?;
    Ok("settings")
}

async fn toggle_setting(
    service: &Service,
    chat_id: i64,
    user: &User,
    which: &str,
) -> Result<&'static str> {
    let mut settings = user.settings.clone();
    let confirmation = match which {
        "code" => {
            settings.use_code_tags = !settings.use_code_tags;
            if settings.use_code_tags {
                "Моноширинный шрифт включён."
            } else {
                "Моноширинный шрифт выключен."
            }
        }
        "yo" => {
            settings.use_yo = !settings.use_yo;
            if settings.use_yo {
                "Буква ё сохраняется."
            } else {
                "Буква ё заменяется на е."
            }
        }
        "output" => {
            settings.long_text_mode = if settings.wants_file_output() {
                "split".to_string()
            } else {
                "file".to_string()
            };
            if settings.wants_file_output() {
                "Длинный текст придёт файлом."
            } else {
                "Длинный текст придёт сообщениями."
            }
        }
        _ => {
            settings.speaker_labels = !settings.speaker_labels;
            if settings.speaker_labels {
                "Подписи спикеров включены."
            } else {
                "Подписи спикеров выключены."
            }
        }
    };

    service
        .storage
        .update_user_settings(user.user_id, &settings)
        .await?;
    service
        .chat
        .send_message(chat_id, confirmation, ParseMode::Plain)
        .await?;
    Ok("setting_toggled")
}

async fn cmd_upload(service: &Service, chat_id: i64) -> Result<&'static str> {
    if service.config.webhook_url.is_empty() {
        service
            .chat
            .send_message(chat_id, "Загрузка файлов временно недоступна.", ParseMode::Plain)
            .await?;
        return Ok("upload_unavailable");
    }
    let upload_url = format!("{}/upload", service.config.webhook_url.trim_end_matches('/'));
    service
        .chat
        .send_message(
            chat_id,
            &format!("📤 Загрузка файлов до 500 МБ:\n{upload_url}"),
            ParseMode::Plain,
        )
        .await?;
    Ok("upload_command")
}

async fn handle_admin_command(
    service: &Service,
    chat_id: i64,
    user: &User,
    command: &str,
    text: &str,
) -> Result<&'static str> {
    match command {
        "/credit" => {
            // /credit <user_id> <minutes>
            let mut parts = text.split_whitespace().skip(1);
            let target: Option<i64> = parts.next().and_then(|p| p.parse().ok());
            let minutes: Option<i64> = parts.next().and_then(|p| p.parse().ok());
            let (Some(target), Some(minutes)) = (target, minutes) else {
                service
                    .chat
                    .send_message(chat_id, "Формат: /credit <user_id> <минуты>", ParseMode::Plain)
                    .await?;
                return Ok("credit_bad_format");
            };
            let balance = service.storage.update_user_balance(target, minutes).await?;
            service
                .chat
                .send_message(
                    chat_id,
                    &format!("Начислено {minutes} мин пользователю {target}. Баланс: {balance} мин."),
                    ParseMode::Plain,
                )
                .await?;
            Ok("credited")
        }
        "/stat" => {
            let users = service.storage.get_all_users(1000).await?;
            let pending = service.storage.get_pending_jobs(100).await?;
            service
                .chat
                .send_message(
                    chat_id,
                    &format!(
                        "📊 Пользователей: {}\nЗадач в очереди: {}",
                        users.len(),
                        pending.len()
                    ),
                    ParseMode::Plain,
                )
                .await?;
            Ok("stat")
        }
        "/status" => {
            service
                .chat
                .send_message(
                    chat_id,
                    &format!(
                        "Сервис работает.\nРегион: {}\nВерсия: {}",
                        service.config.region,
                        env!("CARGO_PKG_VERSION")
                    ),
                    ParseMode::Plain,
                )
                .await?;
            Ok("status")
        }
        "/flush" => {
            let report = sweep::recover_orphaned_jobs(service).await?;
            service
                .chat
                .send_message(
                    chat_id,
                    &format!(
                        "🧹 Зависших задач закрыто: {}\nМинут возвращено: {}",
                        report.failed, report.minutes_refunded
                    ),
                    ParseMode::Plain,
                )
                .await?;
            Ok("flushed")
        }
        "/debug" => {
            let mut settings = user.settings.clone();
            settings.debug_mode = !settings.debug_mode;
            let enabled = settings.debug_mode;
            service
                .storage
                .update_user_settings(user.user_id, &settings)
                .await?;
            service
                .chat
                .send_message(
                    chat_id,
                    if enabled {
                        "Отладка диаризации включена."
                    } else {
                        "Отладка диаризации выключена."
                    },
                    ParseMode::Plain,
                )
                .await?;
            Ok("debug_toggled")
        }
        _ => {
            // /llm <backend> — formatter provider override for this user
            let backend = text.split_whitespace().nth(1).unwrap_or_default();
            let mut settings = user.settings.clone();
            settings.llm_backend = backend.to_string();
            service
                .storage
                .update_user_settings(user.user_id, &settings)
                .await?;
            service
                .chat
                .send_message(
                    chat_id,
                    &if backend.is_empty() {
                        "Бэкенд форматирования сброшен на умолчание.".to_string()
                    } else {
                        format!("Бэкенд форматирования: {backend}.")
                    },
                    ParseMode::Plain,
                )
                .await?;
            Ok("llm_set")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testkit::{TestHarness, TestHarnessBuilder};
    use crate::app::update::{ChatInfo, Message};

    fn command_message(chat_id: i64, text: &str) -> Message {
        Message {
            chat: ChatInfo { id: chat_id },
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn harness_with_user(user_id: i64, balance: i64) -> (TestHarness, User) {
        let builder = TestHarnessBuilder::new();
        let storage = builder.storage.clone().with_user(user_id, balance);
        let harness = TestHarnessBuilder { storage, ..builder }.build();
        let user = harness.storage.users.lock().unwrap()[&user_id].clone();
        (harness, user)
    }

    #[tokio::test]
    async fn test_balance_command() {
        let (harness, user) = harness_with_user(1, 42);
        let outcome = handle_command(&harness.service, &command_message(1, "/balance"), &user)
            .await
            .unwrap();
        assert_eq!(outcome, "balance");
        assert!(harness.chat.sent_texts(1)[0].contains("42 мин"));
    }

    #[tokio::test]
    async fn test_toggle_code_persists() {
        let (harness, user) = harness_with_user(1, 10);
        handle_command(&harness.service, &command_message(1, "/code"), &user)
            .await
            .unwrap();
        let stored = harness.storage.users.lock().unwrap()[&1].clone();
        assert!(stored.settings.use_code_tags);
    }

    #[tokio::test]
    async fn test_output_toggles_between_modes() {
        let (harness, user) = harness_with_user(1, 10);
        handle_command(&harness.service, &command_message(1, "/output"), &user)
            .await
            .unwrap();
        let stored = harness.storage.users.lock().unwrap()[&1].clone();
        assert!(stored.settings.wants_file_output());

        handle_command(&harness.service, &command_message(1, "/output"), &stored)
            .await
            .unwrap();
        let stored = harness.storage.users.lock().unwrap()[&1].clone();
        assert!(!stored.settings.wants_file_output());
    }

    #[tokio::test]
    async fn test_admin_command_rejected_for_regular_user() {
        let (harness, user) = harness_with_user(1, 10);
        let outcome = handle_command(&harness.service, &command_message(1, "/credit 2 50"), &user)
            .await
            .unwrap();
        assert_eq!(outcome, "unauthorized");
    }

    #[tokio::test]
    async fn test_admin_credit() {
        let builder = TestHarnessBuilder::new();
        let storage = builder
            .storage
            .clone()
            .with_user(999, 0)
            .with_user(777, 5);
        let harness = TestHarnessBuilder { storage, ..builder }.build();
        let admin = harness.storage.users.lock().unwrap()[&999].clone();

        let outcome = handle_command(
            &harness.service,
            &command_message(999, "/credit 777 100"),
            &admin,
        )
        .await
        .unwrap();
        assert_eq!(outcome, "credited");
        let target = harness.storage.users.lock().unwrap()[&777].clone();
        assert_eq!(target.balance_minutes, 105);
    }

    #[tokio::test]
    async fn test_command_with_bot_suffix() {
        let (harness, user) = harness_with_user(1, 7);
        let outcome = handle_command(
            &harness.service,
            &command_message(1, "/balance@talkscribe_bot"),
            &user,
        )
        .await
        .unwrap();
        assert_eq!(outcome, "balance");
    }

    #[tokio::test]
    async fn test_unknown_command_hint() {
        let (harness, user) = harness_with_user(1, 7);
        let outcome = handle_command(&harness.service, &command_message(1, "/frobnicate"), &user)
            .await
            .unwrap();
        assert_eq!(outcome, "unknown_command");
        assert!(harness.chat.sent_texts(1)[0].contains("/help"));
    }
}
