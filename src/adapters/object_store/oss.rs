//! Alibaba OSS object store adapter
//!
//! Implements ObjectStorePort with V1 query-string signing: the signature is
//! HMAC-SHA1 over `VERB\nContent-MD5\nContent-Type\nExpires\n/bucket/key`,
//! carried as URL parameters so browsers can PUT directly.

use crate::error::{AppError, Result};
use crate::ports::object_store::ObjectStorePort;
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha1::Sha1;
use std::path::Path;
use std::time::Duration;

/// Content type fixed for signed PUTs
const PUT_CONTENT_TYPE: &str = "application/octet-stream";

/// OSS object store implementation
pub struct OssStore {
    client: Client,
    bucket: String,
    endpoint: String,
    access_key_id: String,
    access_key_secret: String,
}

impl OssStore {
    /// Create a new OSS client for one bucket
    pub fn new(
        bucket: String,
        endpoint: String,
        access_key_id: String,
        access_key_secret: String,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            bucket,
            endpoint: endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string(),
            access_key_id,
            access_key_secret,
        }
    }

    fn expires_at(expires_in: Duration) -> i64 {
        chrono::Utc::now().timestamp() + expires_in.as_secs() as i64
    }

    fn signature(&self, verb: &str, content_type: &str, expires: i64, key: &str) -> String {
        let string_to_sign = format!(
            "{verb}\n\n{content_type}\n{expires}\n/{}/{key}",
            self.bucket
        );
        let mut mac = Hmac::<Sha1>::new_from_slice(self.access_key_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(string_to_sign.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    fn signed_url(
        &self,
        verb: &str,
        content_type: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String> {
        if self.bucket.is_empty() || self.endpoint.is_empty() {
            return Err(AppError::Config("Object store not configured".to_string()));
        }
        let expires = Self::expires_at(expires_in);
        let signature = self.signature(verb, content_type, expires, key);
        Ok(format!(
            "https://{}.{}/{key}?OSSAccessKeyId={}&Expires={expires}&Signature={}",
            self.bucket,
            self.endpoint,
            self.access_key_id,
            url_encode(&signature)
        ))
    }
}

#[async_trait]
impl ObjectStorePort for OssStore {
    fn signed_put_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        self.signed_url("PUT", PUT_CONTENT_TYPE, key, expires_in)
    }

    fn signed_get_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        self.signed_url("GET", "", key, expires_in)
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let url = self.signed_put_url(key, Duration::from_secs(300))?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::ObjectStore(format!("Failed to read {}: {e}", path.display())))?;
        log::info!("Uploading {} bytes to oss://{}/{key}", bytes.len(), self.bucket);

        let response = self
            .client
            .put(&url)
            .header("Content-Type", PUT_CONTENT_TYPE)
            .body(bytes)
            .send()
            .await
            .map_err(|e| AppError::ObjectStore(format!("Upload failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::ObjectStore(format!(
                "Upload failed with {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let url = self.signed_url("DELETE", "", key, Duration::from_secs(300))?;
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| AppError::ObjectStore(format!("Delete failed: {e}")))?;

        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::ObjectStore(format!(
                "Delete failed with {}",
                response.status()
            )));
        }
        log::info!("Deleted oss://{}/{key}", self.bucket);
        Ok(())
    }
}

/// Percent-encode the base64 signature for use as a query value
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
