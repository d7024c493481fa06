//! Inbound chat update model
//!
//! Mirrors the subset of the platform's update object the orchestrator
//! consumes; everything else is ignored by serde.

use crate::domain::models::FileKind;
use serde::Deserialize;

/// One webhook update
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Update {
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
    #[serde(default)]
    pub pre_checkout_query: Option<PreCheckoutQuery>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Message {
    #[serde(default)]
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<UserInfo>,
    pub chat: ChatInfo,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub voice: Option<MediaAttachment>,
    #[serde(default)]
    pub audio: Option<MediaAttachment>,
    #[serde(default)]
    pub video: Option<MediaAttachment>,
    #[serde(default)]
    pub video_note: Option<MediaAttachment>,
    #[serde(default)]
    pub document: Option<DocumentAttachment>,
    #[serde(default)]
    pub successful_payment: Option<SuccessfulPayment>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UserInfo {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChatInfo {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MediaAttachment {
    pub file_id: String,
    #[serde(default)]
    pub duration: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DocumentAttachment {
    pub file_id: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub file_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: UserInfo,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: UserInfo,
    #[serde(default)]
    pub invoice_payload: String,
    #[serde(default)]
    pub total_amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuccessfulPayment {
    #[serde(default)]
    pub invoice_payload: String,
    #[serde(default)]
    pub total_amount: i64,
}

impl Message {
    /// The user id behind the message, when the platform provided one
    pub fn user_id(&self) -> Option<i64> {
        self.from.as_ref().map(|f| f.id)
    }

    /// Extract the transcribable attachment, if any.
    /// Documents qualify only with an audio/video MIME type; their declared
    /// duration is always 0 (probed later).
    pub fn media(&self) -> Option<(String, i64, FileKind)> {
        if let Some(voice) = &self.voice {
            return Some((voice.file_id.clone(), voice.duration, FileKind::Voice));
        }
        if let Some(audio) = &self.audio {
            return Some((audio.file_id.clone(), audio.duration, FileKind::Audio));
        }
        if let Some(video) = &self.video {
            return Some((video.file_id.clone(), video.duration, FileKind::Video));
        }
        if let Some(note) = &self.video_note {
            return Some((note.file_id.clone(), note.duration, FileKind::VideoNote));
        }
        if let Some(document) = &self.document {
            if document.mime_type.starts_with("audio/") || document.mime_type.starts_with("video/")
            {
                return Some((document.file_id.clone(), 0, FileKind::Document));
            }
        }
        None
    }
}

impl Update {
    /// The user id behind the update, whatever its kind
    pub fn user_id(&self) -> Option<i64> {
        if let Some(message) = &self.message {
            return message.user_id();
        }
        if let Some(callback) = &self.callback_query {
            return Some(callback.from.id);
        }
        if let Some(query) = &self.pre_checkout_query {
            return Some(query.from.id);
        }
        None
    }
}
