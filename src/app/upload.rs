//! Direct upload ingress
//!
//! The Mini App web page asks for a short-lived signed PUT URL, uploads the
//! artifact straight to the object store, then hands the key back for
//! processing. Both endpoints authenticate the caller by recomputing the
//! HMAC-SHA256 of the canonicalized init parameters against a key derived
//! from the bot token.

use super::{ingress, Service};
use crate::domain::models::{FileKind, JobDescriptor};
use crate::error::{AppError, Result};
use crate::ports::chat::ParseMode;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

/// Signed URL lifetime
const UPLOAD_URL_EXPIRY: Duration = Duration::from_secs(15 * 60);

/// Accepted upload extensions
const ALLOWED_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "m4a", "ogg", "oga", "opus", "flac", "aac", "mp4", "mov", "mkv", "avi", "webm",
];

/// Issue a signed PUT URL for an upload; returns `(put_url, oss_key)`
pub async fn issue_signed_url(
    service: &Service,
    ext: &str,
    init_data: &str,
) -> Result<(String, String)> {
    let user_id = verify_init_data(init_data, &service.config.bot_token)?;

    let ext = ext.trim_start_matches('.').to_lowercase();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AppError::InvalidInput(format!(
            "Extension .{ext} is not supported"
        )));
    }

    let oss_key = format!("uploads/{user_id}/{}.{ext}", uuid::Uuid::new_v4());
    let put_url = service
        .object_store
        .signed_put_url(&oss_key, UPLOAD_URL_EXPIRY)?;

    log::info!("Issued signed PUT URL for user {user_id}: {oss_key}");
    Ok((put_url, oss_key))
}

/// Create and enqueue a job for an uploaded object; returns the job id
pub async fn process_upload(
    service: &Service,
    oss_key: &str,
    init_data: &str,
    filename: &str,
) -> Result<String> {
    let user_id = verify_init_data(init_data, &service.config.bot_token)?;

    // The caller may only process keys it was issued
    let expected_prefix = format!("uploads/{user_id}/");
    if !oss_key.starts_with(&expected_prefix) {
        return Err(AppError::Unauthorized(format!(
            "Key {oss_key} does not belong to user {user_id}"
        )));
    }

    if service.storage.get_user(user_id).await?.is_none() {
        return Err(AppError::Unauthorized(format!(
            "Unknown user {user_id} on upload surface"
        )));
    }

    let trace_id = super::new_trace_id();
    let download_url = service
        .object_store
        .signed_get_url(oss_key, UPLOAD_URL_EXPIRY)?;

    // Private chats share the user's id
    let chat_id = user_id;
    let status_message_id = service
        .chat
        .send_message(
            chat_id,
            &format!("🎙 Файл «{filename}» получен. Обрабатываю..."),
            ParseMode::Plain,
        )
        .await
        .unwrap_or(0);

    let descriptor = JobDescriptor {
        job_id: uuid::Uuid::new_v4().to_string(),
        user_id,
        chat_id,
        file_ref: download_url,
        file_kind: FileKind::Url,
        duration: 0,
        status_message_id,
        trace_id,
    };
    let job_id = descriptor.job_id.clone();
    ingress::queue_audio_async(service, descriptor).await?;
    Ok(job_id)
}

/// Verify Mini App init data; returns the authenticated user id.
///
/// The check string is every `k=v` pair except `hash`, percent-decoded,
/// sorted by key and newline-joined; the key is HMAC-SHA256 of the bot token
/// keyed with the literal string "WebAppData".
pub fn verify_init_data(init_data: &str, bot_token: &str) -> Result<i64> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut provided_hash = String::new();

    for piece in init_data.split('&') {
        let Some((key, value)) = piece.split_once('=') else {
            continue;
        };
        let value = percent_decode(value);
        if key == "hash" {
            provided_hash = value;
        } else {
            pairs.push((key.to_string(), value));
        }
    }

    if provided_hash.is_empty() {
        return Err(AppError::Unauthorized("init data carries no hash".to_string()));
    }

    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let check_string = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut secret = Hmac::<Sha256>::new_from_slice(b"WebAppData")
        .expect("HMAC accepts any key length");
    secret.update(bot_token.as_bytes());
    let secret_key = secret.finalize().into_bytes();

    let mut mac = Hmac::<Sha256>::new_from_slice(&secret_key)
        .expect("HMAC accepts any key length");
    mac.update(check_string.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if !constant_time_eq(expected.as_bytes(), provided_hash.as_bytes()) {
        return Err(AppError::Unauthorized("init data hash mismatch".to_string()));
    }

    // The authenticated caller lives in the user field as JSON
    let user_json = pairs
        .iter()
        .find(|(k, _)| k == "user")
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| AppError::Unauthorized("init data carries no user".to_string()))?;
    let user: serde_json::Value = serde_json::from_str(user_json)
        .map_err(|_| AppError::Unauthorized("init data user is not JSON".to_string()))?;
    user.get("id")
        .and_then(|id| id.as_i64())
        .ok_or_else(|| AppError::Unauthorized("init data user carries no id".to_string()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let decoded = bytes
                    .get(i + 1)
                    .copied()
                    .and_then(hex_value)
                    .zip(bytes.get(i + 2).copied().and_then(hex_value));
                if let Some((hi, lo)) = decoded {
                    out.push(hi * 16 + lo);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testkit::TestHarnessBuilder;

    /// Build init data signed the way the platform signs it
    fn make_init_data(bot_token: &str, user_id: i64) -> String {
        let user_json = format!(r#"{{"id":{user_id},"first_name":"Test"}}"#);
        let pairs = vec![
            ("auth_date".to_string(), "1700000000".to_string()),
            ("query_id".to_string(), "AAE1".to_string()),
            ("user".to_string(), user_json),
        ];
        let check_string = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut secret =
            Hmac::<Sha256>::new_from_slice(b"WebAppData").expect("HMAC accepts any key length");
        secret.update(bot_token.as_bytes());
        let secret_key = secret.finalize().into_bytes();
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&secret_key).expect("HMAC accepts any key length");
        mac.update(check_string.as_bytes());
        let hash = hex::encode(mac.finalize().into_bytes());

        // The user payload travels percent-encoded on the wire
        let encoded_user = pairs[2]
            .1
            .replace('{', "%7B")
            .replace('}', "%7D")
            .replace('"', "%22")
            .replace(',', "%2C")
            .replace(':', "%3A");
        format!(
            "auth_date=1700000000&query_id=AAE1&user={encoded_user}&hash={hash}"
        )
    }

    #[test]
    fn test_valid_init_data_authenticates() {
        let init_data = make_init_data("test-token", 12345);
        assert_eq!(verify_init_data(&init_data, "test-token").unwrap(), 12345);
    }

    #[test]
    fn test_wrong_token_rejected() {
        let init_data = make_init_data("test-token", 12345);
        assert!(verify_init_data(&init_data, "other-token").is_err());
    }

    #[test]
    fn test_tampered_user_rejected() {
        let init_data = make_init_data("test-token", 12345).replace("12345", "99999");
        assert!(verify_init_data(&init_data, "test-token").is_err());
    }

    #[test]
    fn test_missing_hash_rejected() {
        assert!(verify_init_data("auth_date=1&user=%7B%22id%22%3A1%7D", "t").is_err());
    }

    #[tokio::test]
    async fn test_signed_url_issuing() {
        let builder = TestHarnessBuilder::new();
        let storage = builder.storage.clone().with_user(12345, 10);
        let harness = TestHarnessBuilder { storage, ..builder }.build();

        let init_data = make_init_data("test-token", 12345);
        let (put_url, oss_key) = issue_signed_url(&harness.service, "mp3", &init_data)
            .await
            .unwrap();
        assert!(oss_key.starts_with("uploads/12345/"));
        assert!(oss_key.ends_with(".mp3"));
        assert!(put_url.contains(&oss_key));
    }

    #[tokio::test]
    async fn test_extension_whitelist() {
        let builder = TestHarnessBuilder::new();
        let storage = builder.storage.clone().with_user(12345, 10);
        let harness = TestHarnessBuilder { storage, ..builder }.build();

        let init_data = make_init_data("test-token", 12345);
        let result = issue_signed_url(&harness.service, "exe", &init_data).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_process_upload_checks_key_ownership() {
        let builder = TestHarnessBuilder::new();
        let storage = builder.storage.clone().with_user(12345, 10);
        let harness = TestHarnessBuilder { storage, ..builder }.build();

        let init_data = make_init_data("test-token", 12345);
        let result = process_upload(
            &harness.service,
            "uploads/777/stolen.mp3",
            &init_data,
            "stolen.mp3",
        )
        .await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_process_upload_creates_and_queues_job() {
        let builder = TestHarnessBuilder::new();
        let storage = builder.storage.clone().with_user(12345, 10);
        let harness = TestHarnessBuilder { storage, ..builder }.build();

        let init_data = make_init_data("test-token", 12345);
        let job_id = process_upload(
            &harness.service,
            "uploads/12345/abc.mp3",
            &init_data,
            "meeting.mp3",
        )
        .await
        .unwrap();

        let jobs = harness.storage.jobs.lock().unwrap();
        let job = &jobs[&job_id];
        assert_eq!(job.file_kind, FileKind::Url);
        assert!(job.file_ref.contains("uploads/12345/abc.mp3"));
        assert_eq!(harness.queue.published_bodies().len(), 1);
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("%7B%22id%22%3A1%7D"), r#"{"id":1}"#);
        assert_eq!(percent_decode("plain"), "plain");
        assert_eq!(percent_decode("a+b"), "a b");
    }
}
