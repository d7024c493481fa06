//! Alibaba MNS queue adapter
//!
//! Implements QueuePort over the MNS REST surface. Requests are signed with
//! HMAC-SHA1 over the canonical string; bodies are the service's small XML
//! documents, built and picked apart with plain string helpers.

use crate::error::{AppError, Result};
use crate::ports::queue::{QueuePort, ReceivedMessage};
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha1::Sha1;
use std::time::Duration;

const MNS_VERSION: &str = "2015-06-06";
const XML_CONTENT_TYPE: &str = "text/xml;charset=utf-8";

/// MNS queue service implementation
pub struct MnsQueue {
    client: Client,
    endpoint: String,
    access_key_id: String,
    access_key_secret: String,
}

impl MnsQueue {
    /// Create a new MNS queue client
    pub fn new(endpoint: String, access_key_id: String, access_key_secret: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(35)) // must outlast the long-poll
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            access_key_id,
            access_key_secret,
        }
    }

    fn sign(&self, verb: &str, date: &str, resource: &str) -> String {
        let string_to_sign = format!(
            "{verb}\n\n{XML_CONTENT_TYPE}\n{date}\nx-mns-version:{MNS_VERSION}\n{resource}"
        );
        let mut mac = Hmac::<Sha1>::new_from_slice(self.access_key_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(string_to_sign.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    async fn request(
        &self,
        verb: reqwest::Method,
        resource: &str,
        body: Option<String>,
    ) -> Result<(reqwest::StatusCode, String)> {
        let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let signature = self.sign(verb.as_str(), &date, resource);

        let mut request = self
            .client
            .request(verb, format!("{}{resource}", self.endpoint))
            .header("Date", &date)
            .header("Content-Type", XML_CONTENT_TYPE)
            .header("x-mns-version", MNS_VERSION)
            .header(
                "Authorization",
                format!("MNS {}:{signature}", self.access_key_id),
            );
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Queue(format!("MNS request failed: {e}")))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Ok((status, text))
    }
}

#[async_trait]
impl QueuePort for MnsQueue {
    async fn publish(&self, queue: &str, body: &str) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(body);
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Message xmlns=\"http://mns.aliyuncs.com/doc/v1/\">\
             <MessageBody>{encoded}</MessageBody></Message>"
        );

        let resource = format!("/queues/{queue}/messages");
        let (status, text) = self
            .request(reqwest::Method::POST, &resource, Some(xml))
            .await?;

        if !status.is_success() {
            return Err(AppError::Queue(format!(
                "Publish failed {status}: {}",
                xml_tag(&text, "Message").unwrap_or_else(|| text.chars().take(200).collect())
            )));
        }

        let message_id = xml_tag(&text, "MessageId")
            .ok_or_else(|| AppError::Queue("Publish response carried no MessageId".to_string()))?;
        log::info!("Published message {message_id} to queue {queue}");
        Ok(message_id)
    }

    async fn receive(
        &self,
        queue: &str,
        wait_secs: u32,
        visibility_secs: u32,
    ) -> Result<Option<ReceivedMessage>> {
        let resource = format!("/queues/{queue}/messages?waitseconds={wait_secs}");
        let (status, text) = self.request(reqwest::Method::GET, &resource, None).await?;

        if status == reqwest::StatusCode::NOT_FOUND && text.contains("MessageNotExist") {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AppError::Queue(format!(
                "Receive failed {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let body_encoded = xml_tag(&text, "MessageBody")
            .ok_or_else(|| AppError::Queue("Receive response carried no body".to_string()))?;
        let body_bytes = base64::engine::general_purpose::STANDARD
            .decode(body_encoded.as_bytes())
            .map_err(|e| AppError::Queue(format!("Message body decode failed: {e}")))?;
        let body = String::from_utf8(body_bytes)
            .map_err(|e| AppError::Queue(format!("Message body not UTF-8: {e}")))?;

        let message_id = xml_tag(&text, "MessageId").unwrap_or_default();
        let mut receipt_handle = xml_tag(&text, "ReceiptHandle").unwrap_or_default();
        let dequeue_count = xml_tag(&text, "DequeueCount")
            .and_then(|c| c.parse().ok())
            .unwrap_or(1);

        // Visibility is per-queue in MNS; stretch this one message to the
        // caller's window, which also refreshes the receipt handle
        match self
            .change_visibility(queue, &receipt_handle, visibility_secs)
            .await
        {
            Ok(new_handle) => receipt_handle = new_handle,
            Err(e) => log::warn!("Visibility change failed for {message_id}: {e}"),
        }

        Ok(Some(ReceivedMessage {
            body,
            message_id,
            receipt_handle,
            dequeue_count,
        }))
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<()> {
        let resource = format!(
            "/queues/{queue}/messages?ReceiptHandle={}",
            percent_encode(receipt_handle)
        );
        let (status, text) = self.request(reqwest::Method::DELETE, &resource, None).await?;
        if !status.is_success() {
            return Err(AppError::Queue(format!(
                "Delete failed {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }
        Ok(())
    }

    async fn change_visibility(
        &self,
        queue: &str,
        receipt_handle: &str,
        visibility_secs: u32,
    ) -> Result<String> {
        let resource = format!(
            "/queues/{queue}/messages?receiptHandle={}&visibilityTimeout={visibility_secs}",
            percent_encode(receipt_handle)
        );
        let (status, text) = self.request(reqwest::Method::PUT, &resource, None).await?;
        if !status.is_success() {
            return Err(AppError::Queue(format!(
                "Visibility change failed {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }
        xml_tag(&text, "ReceiptHandle")
            .ok_or_else(|| AppError::Queue("Visibility response carried no handle".to_string()))
    }
}

/// Extract the text content of the first `<tag>…</tag>` in an XML body
fn xml_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string())
}

/// Percent-encode a query value (receipt handles can carry `+ / =`)
fn percent_encode(value: &str) -> String {
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
    fn test_xml_tag_extraction() {
        let xml = "<Message><MessageId>abc-123</MessageId>\
                   <ReceiptHandle>rh+x/y=</ReceiptHandle></Message>";
        assert_eq!(xml_tag(xml, "MessageId").unwrap(), "abc-123");
        assert_eq!(xml_tag(xml, "ReceiptHandle").unwrap(), "rh+x/y=");
        assert!(xml_tag(xml, "DequeueCount").is_none());
    }

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("abc-123"), "abc-123");
        assert_eq!(percent_encode("a+b/c="), "a%2Bb%2Fc%3D");
    }

    #[test]
    fn test_signature_is_deterministic() {
        let queue = MnsQueue::new(
            "https://1234.mns.eu-central-1.aliyuncs.com".to_string(),
            "ak".to_string(),
            "sk".to_string(),
        );
        let a = queue.sign("GET", "Thu, 01 Jan 2026 00:00:00 GMT", "/queues/q/messages");
        let b = queue.sign("GET", "Thu, 01 Jan 2026 00:00:00 GMT", "/queues/q/messages");
        assert_eq!(a, b);
        let c = queue.sign("POST", "Thu, 01 Jan 2026 00:00:00 GMT", "/queues/q/messages");
        assert_ne!(a, c);
    }
}
