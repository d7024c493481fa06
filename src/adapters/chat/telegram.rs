//! Telegram Bot API adapter
//!
//! Implements ChatPort over the HTTP bot API. Default request timeout is
//! 30 s, file downloads get 60 s, and the "typing" chat action is
//! fire-and-forget with a 2 s cap.

use crate::error::{AppError, Result};
use crate::ports::chat::{ChatPort, InlineKeyboard, Invoice, ParseMode};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DOWNLOAD_TIMEOUT_SECS: u64 = 60;
const ACTION_TIMEOUT_SECS: u64 = 2;

/// Telegram Bot API service implementation
pub struct TelegramService {
    client: Client,
    download_client: Client,
    token: String,
}

impl TelegramService {
    /// Create a new Telegram service with the given bot token
    pub fn new(token: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");
        let download_client = Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            download_client,
            token,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{TELEGRAM_API_BASE}/bot{}/{method}", self.token)
    }

    /// POST a method and return the `result` field of the `{ok, result}`
    /// envelope
    async fn call(&self, method: &str, body: Value) -> Result<Value> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Chat(format!("{method} request failed: {e}")))?;

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| AppError::Chat(format!("{method} response parse failed: {e}")))?;

        if !envelope.ok {
            return Err(AppError::Chat(format!(
                "{method} returned error: {}",
                envelope.description.unwrap_or_default()
            )));
        }

        Ok(envelope.result.unwrap_or(Value::Null))
    }

    fn parse_mode_value(parse_mode: ParseMode) -> Option<&'static str> {
        match parse_mode {
            ParseMode::Plain => None,
            ParseMode::Html => Some("HTML"),
        }
    }

    fn message_body(chat_id: i64, text: &str, parse_mode: ParseMode) -> Value {
        let mut body = json!({"chat_id": chat_id, "text": text});
        if let Some(mode) = Self::parse_mode_value(parse_mode) {
            body["parse_mode"] = json!(mode);
        }
        body
    }
}

#[async_trait]
impl ChatPort for TelegramService {
    async fn send_message(&self, chat_id: i64, text: &str, parse_mode: ParseMode) -> Result<i64> {
        let result = self
            .call("sendMessage", Self::message_body(chat_id, text, parse_mode))
            .await?;
        Ok(result
            .get("message_id")
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    async fn send_message_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: ParseMode,
        keyboard: &InlineKeyboard,
    ) -> Result<i64> {
        let mut body = Self::message_body(chat_id, text, parse_mode);
        let rows: Vec<Vec<Value>> = keyboard
            .iter()
            .map(|row| {
                row.iter()
                    .map(|(label, data)| json!({"text": label, "callback_data": data}))
                    .collect()
            })
            .collect();
        body["reply_markup"] = json!({ "inline_keyboard": rows });
        let result = self.call("sendMessage", body).await?;
        Ok(result
            .get("message_id")
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        parse_mode: ParseMode,
    ) -> Result<()> {
        let mut body = Self::message_body(chat_id, text, parse_mode);
        body["message_id"] = json!(message_id);
        self.call("editMessageText", body).await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        self.call(
            "deleteMessage",
            json!({"chat_id": chat_id, "message_id": message_id}),
        )
        .await?;
        Ok(())
    }

    async fn send_chat_action(&self, chat_id: i64, action: &str) {
        // Fire-and-forget; a dropped typing indicator is not an error
        let result = self
            .client
            .post(self.method_url("sendChatAction"))
            .timeout(Duration::from_secs(ACTION_TIMEOUT_SECS))
            .json(&json!({"chat_id": chat_id, "action": action}))
            .send()
            .await;
        if let Err(e) = result {
            log::debug!("sendChatAction failed: {e}");
        }
    }

    async fn get_file_path(&self, file_id: &str) -> Result<String> {
        let result = self.call("getFile", json!({"file_id": file_id})).await?;
        result
            .get("file_path")
            .and_then(Value::as_str)
            .map(|p| p.to_string())
            .ok_or_else(|| AppError::Chat("getFile returned no file_path".to_string()))
    }

    async fn download_file(&self, file_path: &str) -> Result<PathBuf> {
        let url = format!(
            "{TELEGRAM_API_BASE}/file/bot{}/{file_path}",
            self.token
        );
        self.download_url(&url).await
    }

    async fn download_url(&self, url: &str) -> Result<PathBuf> {
        let response = self
            .download_client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Chat(format!("Download failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Chat(format!(
                "Download failed with {}",
                response.status()
            )));
        }

        let extension = url
            .rsplit('.')
            .next()
            .filter(|e| e.len() <= 4 && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin");
        let path = std::env::temp_dir().join(format!(
            "talkscribe_dl_{}.{extension}",
            uuid::Uuid::new_v4().simple()
        ));

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Chat(format!("Download body read failed: {e}")))?;
        tokio::fs::write(&path, &bytes).await?;

        log::info!("Downloaded {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }

    async fn send_as_file(&self, chat_id: i64, text: &str, caption: &str) -> Result<()> {
        let part = reqwest::multipart::Part::text(text.to_string())
            .file_name("transcript.txt")
            .mime_str("text/plain")
            .map_err(|e| AppError::Chat(format!("Multipart build failed: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("document", part);

        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::Chat(format!("sendDocument failed: {e}")))?;

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| AppError::Chat(format!("sendDocument response parse failed: {e}")))?;
        if !envelope.ok {
            return Err(AppError::Chat(format!(
                "sendDocument returned error: {}",
                envelope.description.unwrap_or_default()
            )));
        }
        Ok(())
    }

    async fn send_invoice(&self, chat_id: i64, invoice: &Invoice) -> Result<()> {
        self.call(
            "sendInvoice",
            json!({
                "chat_id": chat_id,
                "title": invoice.title,
                "description": invoice.description,
                "payload": invoice.payload,
                "currency": "XTR",
                "prices": [{"label": invoice.title, "amount": invoice.stars_amount}]
            }),
        )
        .await?;
        Ok(())
    }

    async fn answer_pre_checkout(&self, query_id: &str, ok: bool) -> Result<()> {
        self.call(
            "answerPreCheckoutQuery",
            json!({"pre_checkout_query_id": query_id, "ok": ok}),
        )
        .await?;
        Ok(())
    }
}

// ===== API Response Types =====

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_body_plain_omits_parse_mode() {
        let body = TelegramService::message_body(42, "hello", ParseMode::Plain);
        assert!(body.get("parse_mode").is_none());
        assert_eq!(body["chat_id"], 42);
    }

    #[test]
    fn test_message_body_html() {
        let body = TelegramService::message_body(42, "<code>x</code>", ParseMode::Html);
        assert_eq!(body["parse_mode"], "HTML");
    }

    #[test]
    fn test_envelope_parse() {
        let json = r#"{"ok": true, "result": {"message_id": 7}}"#;
        let envelope: ApiEnvelope = serde_json::from_str(json).unwrap();
        assert!(envelope.ok);
        assert_eq!(envelope.result.unwrap()["message_id"], 7);
    }

    #[test]
    fn test_error_envelope_parse() {
        let json = r#"{"ok": false, "description": "Bad Request: message not found"}"#;
        let envelope: ApiEnvelope = serde_json::from_str(json).unwrap();
        assert!(!envelope.ok);
        assert!(envelope.description.unwrap().contains("not found"));
    }
}
