/// Queue port trait
///
/// At-least-once message queue: consumers must treat redelivery as normal
/// and deduplicate on job state.
use crate::error::Result;
use async_trait::async_trait;

/// A message received from the queue
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// UTF-8 JSON body
    pub body: String,
    pub message_id: String,
    /// Handle used to delete or re-hide the message
    pub receipt_handle: String,
    /// Provider-side dequeue count; used only for logging
    pub dequeue_count: u32,
}

/// Port trait for the at-least-once queue
#[async_trait]
pub trait QueuePort: Send + Sync {
    /// Publish a message body to the named queue
    async fn publish(&self, queue: &str, body: &str) -> Result<String>;

    /// Receive one message with long-poll `wait_secs` and the given
    /// visibility timeout; `None` when the queue is empty
    async fn receive(
        &self,
        queue: &str,
        wait_secs: u32,
        visibility_secs: u32,
    ) -> Result<Option<ReceivedMessage>>;

    /// Delete a message after successful processing
    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<()>;

    /// Extend or shorten a message's visibility timeout
    async fn change_visibility(
        &self,
        queue: &str,
        receipt_handle: &str,
        visibility_secs: u32,
    ) -> Result<String>;
}
