//! Cloud-drive share-link ingress
//!
//! Recognizes share URLs from the supported drives and resolves each to a
//! direct-download URL: one provider needs an API round-trip, the others are
//! plain URL rewrites.

use crate::error::{AppError, Result};

/// Supported cloud-drive providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveProvider {
    YandexDisk,
    Dropbox,
    GoogleDrive,
}

/// Detect a share URL; `None` for anything else
pub fn detect(text: &str) -> Option<DriveProvider> {
    let text = text.trim();
    if !text.starts_with("http://") && !text.starts_with("https://") {
        return None;
    }
    if text.contains("disk.yandex.") {
        Some(DriveProvider::YandexDisk)
    } else if text.contains("dropbox.com/") {
        Some(DriveProvider::Dropbox)
    } else if text.contains("drive.google.com/") {
        Some(DriveProvider::GoogleDrive)
    } else {
        None
    }
}

/// Resolve a share URL to a direct-download URL
pub async fn resolve(client: &reqwest::Client, provider: DriveProvider, url: &str) -> Result<String> {
    match provider {
        DriveProvider::YandexDisk => resolve_yandex(client, url).await,
        DriveProvider::Dropbox => Ok(rewrite_dropbox(url)),
        DriveProvider::GoogleDrive => rewrite_google_drive(url),
    }
}

/// Yandex Disk exposes public downloads behind an API round-trip
async fn resolve_yandex(client: &reqwest::Client, url: &str) -> Result<String> {
    let api_url = format!(
        "https://cloud-api.yandex.net/v1/disk/public/resources/download?public_key={}",
        url_encode(url)
    );
    let response = client
        .get(&api_url)
        .send()
        .await
        .map_err(|e| AppError::Other(format!("Yandex Disk resolve failed: {e}")))?;

    if !response.status().is_success() {
        return Err(AppError::Other(format!(
            "Yandex Disk resolve failed with {}",
            response.status()
        )));
    }

    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| AppError::Other(format!("Yandex Disk response parse failed: {e}")))?;

    body.get("href")
        .and_then(|h| h.as_str())
        .map(|h| h.to_string())
        .ok_or_else(|| AppError::Other("Yandex Disk response carried no href".to_string()))
}

/// Dropbox share links download directly from the usercontent host
fn rewrite_dropbox(url: &str) -> String {
    let rewritten = url.replace("www.dropbox.com", "dl.dropboxusercontent.com");
    let rewritten = rewritten
        .replace("?dl=0", "?dl=1")
        .replace("&dl=0", "&dl=1");
    if rewritten.contains("dl=1") {
        rewritten
    } else if rewritten.contains('?') {
        format!("{rewritten}&dl=1")
    } else {
        format!("{rewritten}?dl=1")
    }
}

/// Google Drive file links rewrite onto the uc endpoint
fn rewrite_google_drive(url: &str) -> Result<String> {
    // Shapes: /file/d/{id}/view, /open?id={id}, /uc?id={id}
    let file_id = if let Some(rest) = url.split("/file/d/").nth(1) {
        rest.split(['/', '?']).next()
    } else if let Some(rest) = url.split("id=").nth(1) {
        rest.split('&').next()
    } else {
        None
    };

    let file_id = file_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::InvalidInput(format!("Unrecognized Google Drive URL: {url}")))?;

    Ok(format!(
        "https://drive.google.com/uc?export=download&id={file_id}"
    ))
}

fn url_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection() {
        assert_eq!(
            detect("https://disk.yandex.com/i/XYZ"),
            Some(DriveProvider::YandexDisk)
        );
        assert_eq!(
            detect("https://disk.yandex.ru/d/abc"),
            Some(DriveProvider::YandexDisk)
        );
        assert_eq!(
            detect("https://www.dropbox.com/s/abc/file.mp3?dl=0"),
            Some(DriveProvider::Dropbox)
        );
        assert_eq!(
            detect("https://drive.google.com/file/d/FILEID/view"),
            Some(DriveProvider::GoogleDrive)
        );
        assert_eq!(detect("hello world"), None);
        assert_eq!(detect("https://example.com/audio.mp3"), None);
        assert_eq!(detect("disk.yandex.com/i/XYZ"), None);
    }

    #[test]
    fn test_dropbox_rewrite() {
        assert_eq!(
            rewrite_dropbox("https://www.dropbox.com/s/abc/file.mp3?dl=0"),
            "https://dl.dropboxusercontent.com/s/abc/file.mp3?dl=1"
        );
        assert_eq!(
            rewrite_dropbox("https://www.dropbox.com/s/abc/file.mp3"),
            "https://dl.dropboxusercontent.com/s/abc/file.mp3?dl=1"
        );
    }

    #[test]
    fn test_google_drive_rewrite() {
        assert_eq!(
            rewrite_google_drive("https://drive.google.com/file/d/FILEID/view?usp=sharing")
                .unwrap(),
            "https://drive.google.com/uc?export=download&id=FILEID"
        );
        assert_eq!(
            rewrite_google_drive("https://drive.google.com/open?id=FILEID").unwrap(),
            "https://drive.google.com/uc?export=download&id=FILEID"
        );
        assert!(rewrite_google_drive("https://drive.google.com/drive/folders/").is_err());
    }
}
