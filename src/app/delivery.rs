//! Result delivery
//!
//! Three modes: edit the progress message in place for short results, attach
//! a text file, or split across messages on paragraph boundaries. Markup is
//! HTML exactly when the user asked for code tags.

use super::Service;
use crate::domain::models::UserSettings;
use crate::error::Result;
use crate::ports::chat::{split_long_text, ParseMode, MAX_MESSAGE_CHARS};

/// Results at or below this length are edited into the progress message
const EDIT_IN_PLACE_LIMIT: usize = 4000;

/// Longest caption attached to a file delivery
const CAPTION_LIMIT: usize = 200;

/// Deliver formatted text to the user.
///
/// `progress_message_id` of 0 means no progress message exists; a delivery
/// failure retries once as a plain send before propagating.
pub async fn deliver_result(
    service: &Service,
    chat_id: i64,
    progress_message_id: i64,
    text: &str,
    settings: &UserSettings,
) -> Result<()> {
    let (wire_text, parse_mode) = if settings.use_code_tags {
        (format!("<code>{text}</code>"), ParseMode::Html)
    } else {
        (text.to_string(), ParseMode::Plain)
    };

    let length = wire_text.chars().count();
    let mode = if progress_message_id != 0 && length <= EDIT_IN_PLACE_LIMIT {
        "edit"
    } else if settings.wants_file_output() {
        "file"
    } else {
        "split"
    };
    log::info!("[deliver] mode={mode}, chars={length}, chat={chat_id}");

    match mode {
        "edit" => {
            let result = service
                .chat
                .edit_message_text(chat_id, progress_message_id, &wire_text, parse_mode)
                .await;
            if let Err(e) = result {
                // Retry once as a plain send; the progress message may have
                // been deleted by the user meanwhile
                log::warn!("Edit delivery failed: {e}, retrying as send");
                service
                    .chat
                    .send_message(chat_id, &wire_text, parse_mode)
                    .await?;
            }
        }
        "file" => {
            if progress_message_id != 0 {
                let _ = service.chat.delete_message(chat_id, progress_message_id).await;
            }
            service
                .chat
                .send_as_file(chat_id, text, &file_caption(text))
                .await?;
        }
        _ => {
            if progress_message_id != 0 {
                let _ = service.chat.delete_message(chat_id, progress_message_id).await;
            }
            for part in split_long_text(&wire_text, MAX_MESSAGE_CHARS) {
                service.chat.send_message(chat_id, &part, parse_mode).await?;
            }
        }
    }

    Ok(())
}

/// First sentence of the text, capped, as the attachment caption
fn file_caption(text: &str) -> String {
    let first_dot = text.find('.');
    let caption: String = match first_dot {
        Some(position) if position > 0 && position < CAPTION_LIMIT => {
            text.chars().take_while(|c| *c != '.').collect::<String>() + "."
        }
        _ => text.chars().take(CAPTION_LIMIT).collect(),
    };
    format!("{caption}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testkit::TestHarnessBuilder;
    use crate::ports::mocks::ChatEvent;

    #[tokio::test]
    async fn test_short_result_edits_progress_message() {
        let harness = TestHarnessBuilder::new().build();
        deliver_result(
            &harness.service,
            67890,
            42,
            "Hello world",
            &UserSettings::default(),
        )
        .await
        .unwrap();

        assert_eq!(harness.chat.last_edit_of(42).unwrap(), "Hello world");
        assert!(harness.chat.deleted_message_ids().is_empty());
    }

    #[tokio::test]
    async fn test_long_result_splits_and_deletes_progress() {
        let harness = TestHarnessBuilder::new().build();
        let text = "Абзац первый.\n\n".repeat(400);
        deliver_result(&harness.service, 1, 42, &text, &UserSettings::default())
            .await
            .unwrap();

        assert_eq!(harness.chat.deleted_message_ids(), vec![42]);
        let sent = harness.chat.sent_texts(1);
        assert!(sent.len() > 1);
        for part in sent {
            assert!(part.chars().count() <= MAX_MESSAGE_CHARS);
        }
    }

    #[tokio::test]
    async fn test_file_mode_sends_document_with_caption() {
        let harness = TestHarnessBuilder::new().build();
        let mut settings = UserSettings::default();
        settings.long_text_mode = "file".to_string();
        let text = format!("Первое предложение. {}", "дальше текст ".repeat(500));
        deliver_result(&harness.service, 1, 42, &text, &settings)
            .await
            .unwrap();

        let events = harness.chat.events();
        assert!(events.iter().any(|e| matches!(
            e,
            ChatEvent::Document { caption, .. } if caption == "Первое предложение...."
        )));
        assert_eq!(harness.chat.deleted_message_ids(), vec![42]);
    }

    #[tokio::test]
    async fn test_code_tags_switch_to_html() {
        let harness = TestHarnessBuilder::new().build();
        let mut settings = UserSettings::default();
        settings.use_code_tags = true;
        deliver_result(&harness.service, 1, 42, "текст", &settings)
            .await
            .unwrap();

        let events = harness.chat.events();
        assert!(events.iter().any(|e| matches!(
            e,
            ChatEvent::Edited { text, parse_mode, .. }
                if text == "<code>текст</code>" && *parse_mode == ParseMode::Html
        )));
    }

    #[tokio::test]
    async fn test_no_progress_message_falls_back_to_split() {
        let harness = TestHarnessBuilder::new().build();
        deliver_result(&harness.service, 1, 0, "короткий", &UserSettings::default())
            .await
            .unwrap();
        assert_eq!(harness.chat.sent_texts(1), vec!["короткий".to_string()]);
    }

    #[test]
    fn test_caption_without_early_dot_truncates() {
        let caption = file_caption(&"слово ".repeat(100));
        assert!(caption.ends_with("..."));
        assert!(caption.chars().count() <= CAPTION_LIMIT + 3);
    }
}
