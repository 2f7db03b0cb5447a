//! In-memory blob store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{BackendError, BlobStore};

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read an object back.
    pub async fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), BackendError> {
        if bucket.is_empty() {
            return Err(BackendError::InvalidRequest("bucket must not be empty".to_string()));
        }
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_overwrites() {
        let blobs = MemoryBlobStore::new();
        blobs.put("archive", "run.json", b"one".to_vec()).await.unwrap();
        blobs.put("archive", "run.json", b"two".to_vec()).await.unwrap();
        assert_eq!(blobs.get("archive", "run.json").await, Some(b"two".to_vec()));
        assert!(blobs.put("", "k", Vec::new()).await.is_err());
    }
}
