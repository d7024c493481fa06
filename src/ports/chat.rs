/// Chat platform port trait
///
/// Defines the interface to the messaging platform the bot fronts.
/// Implementation: Telegram Bot API.
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hard limit on a single chat message
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Parse mode for outgoing messages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ParseMode {
    #[default]
    Plain,
    Html,
}

/// A minimal inline keyboard: rows of (label, callback_data) buttons
pub type InlineKeyboard = Vec<Vec<(String, String)>>;

/// An invoice to send (Telegram Stars currency)
#[derive(Debug, Clone)]
pub struct Invoice {
    pub title: String,
    pub description: String,
    pub payload: String,
    pub stars_amount: i64,
}

/// Port trait for chat platform operations
#[async_trait]
pub trait ChatPort: Send + Sync {
    /// Send a message; returns the new message id
    async fn send_message(&self, chat_id: i64, text: &str, parse_mode: ParseMode) -> Result<i64>;

    /// Send a message with an inline keyboard
    async fn send_message_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: ParseMode,
        keyboard: &InlineKeyboard,
    ) -> Result<i64>;

    /// Edit a message in place
    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        parse_mode: ParseMode,
    ) -> Result<()>;

    /// Delete a message
    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()>;

    /// Fire-and-forget "typing" indicator
    async fn send_chat_action(&self, chat_id: i64, action: &str);

    /// Resolve a platform file id to a downloadable file path
    async fn get_file_path(&self, file_id: &str) -> Result<String>;

    /// Download a platform file to a local temp path
    async fn download_file(&self, file_path: &str) -> Result<PathBuf>;

    /// Download an arbitrary URL to a local temp path (cloud-drive imports,
    /// object-store signed GETs)
    async fn download_url(&self, url: &str) -> Result<PathBuf>;

    /// Send text as an attached .txt document with a short caption
    async fn send_as_file(&self, chat_id: i64, text: &str, caption: &str) -> Result<()>;

    /// Send an invoice payable in Stars
    async fn send_invoice(&self, chat_id: i64, invoice: &Invoice) -> Result<()>;

    /// Approve or reject a pre-checkout query
    async fn answer_pre_checkout(&self, query_id: &str, ok: bool) -> Result<()>;
}

/// Split long text into chunks of at most `MAX_MESSAGE_CHARS`, preferring
/// paragraph boundaries, then line boundaries, then hard cuts.
pub fn split_long_text(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for paragraph in text.split("\n\n") {
        let para_len = paragraph.chars().count();
        if current_len + para_len + 2 <= limit {
            if !current.is_empty() {
                current.push_str("\n\n");
                current_len += 2;
            }
            current.push_str(paragraph);
            current_len += para_len;
            continue;
        }

        if !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if para_len <= limit {
            current.push_str(paragraph);
            current_len = para_len;
        } else {
            // Paragraph alone exceeds the limit: split on lines, then hard
            for line in paragraph.split('\n') {
                let line_len = line.chars().count();
                if current_len + line_len + 1 > limit && !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                if line_len > limit {
                    let chars: Vec<char> = line.chars().collect();
                    for piece in chars.chunks(limit) {
                        let piece: String = piece.iter().collect();
                        if !current.is_empty() {
                            parts.push(std::mem::take(&mut current));
                            current_len = 0;
                        }
                        if piece.chars().count() == limit {
                            parts.push(piece);
                        } else {
                            current = piece;
                            current_len = current.chars().count();
                        }
                    }
                } else {
                    if !current.is_empty() {
                        current.push('\n');
                        current_len += 1;
                    }
                    current.push_str(line);
                    current_len += line_len;
                }
            }
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
                current_len = 0;
            }
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}
