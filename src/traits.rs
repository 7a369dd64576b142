//! Provider seams for the ingestion and generation pipelines.
//!
//! Model calls and blob storage sit behind traits so the pipelines can be
//! exercised in tests with deterministic fakes while production wires in
//! the Bedrock client and the S3 store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::models::Turn;

/// Turns text into a fixed-dimension embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError>;
}

/// Chat-style text completion.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Run the conversation through the model and return the reply text.
    async fn complete(
        &self,
        messages: &[Turn],
        system: Option<&str>,
        max_tokens: u32,
    ) -> Result<String, PipelineError>;
}

/// Bucket/key addressed blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, PipelineError>;

    /// Store `bytes` under `bucket`/`key` and return the storage path
    /// (`s3://bucket/key` style) recorded in the database.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, PipelineError>;
}

/// In-memory [`BlobStore`] used by tests and local dry runs.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, PipelineError> {
        let objects = self.objects.lock().expect("blob store lock poisoned");
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| {
                PipelineError::content(format!("object not found: {}/{}", bucket, key))
            })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, PipelineError> {
        let mut objects = self.objects.lock().expect("blob store lock poisoned");
        objects.insert((bucket.to_string(), key.to_string()), bytes);
        Ok(format!("s3://{}/{}", bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_objects() {
        let store = MemoryBlobStore::new();
        let path = store
            .put("uploads", "p1/file.txt", b"hello".to_vec(), "text/plain")
            .await
            .unwrap();
        assert_eq!(path, "s3://uploads/p1/file.txt");
        assert_eq!(store.get("uploads", "p1/file.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn memory_store_missing_object_is_content_error() {
        let store = MemoryBlobStore::new();
        let err = store.get("uploads", "nope").await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
