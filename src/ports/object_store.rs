/// Object store port trait
///
/// Signed-URL access to the blob store used for large uploads and as the
/// audio source for asynchronous transcription passes.
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Port trait for the object store
#[async_trait]
pub trait ObjectStorePort: Send + Sync {
    /// Signed PUT URL for a key (Content-Type: application/octet-stream)
    fn signed_put_url(&self, key: &str, expires_in: Duration) -> Result<String>;

    /// Signed GET URL for a key
    fn signed_get_url(&self, key: &str, expires_in: Duration) -> Result<String>;

    /// Upload a local file under the given key
    async fn put_file(&self, key: &str, path: &Path) -> Result<()>;

    /// Delete an object; failure is logged by callers, not fatal
    async fn delete_object(&self, key: &str) -> Result<()>;
}
