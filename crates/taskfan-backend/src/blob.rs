//! Blob store interface, used only to archive job files.

use async_trait::async_trait;

use crate::BackendError;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `bucket/key`, replacing any previous object.
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), BackendError>;
}
