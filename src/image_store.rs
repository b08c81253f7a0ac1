use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::PipelineError;

/// Object storage for uploaded page images, keyed by the `image_key` carried
/// on a [`crate::types::Page`]. Out of scope per the spec this crate
/// implements (uploads and MinIO wiring live outside the pipeline), so this
/// is the narrow trait a real bucket-backed store would fill in, with an
/// in-memory stand-in so the OCR stage has something to call in tests.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn get(&self, image_key: &str) -> Result<Vec<u8>, PipelineError>;
    async fn put(&self, image_key: String, bytes: Vec<u8>) -> Result<(), PipelineError>;
}

pub struct InMemoryImageStore {
    inner: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryImageStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl ImageStore for InMemoryImageStore {
    async fn get(&self, image_key: &str) -> Result<Vec<u8>, PipelineError> {
        self.inner
            .read()
            .await
            .get(image_key)
            .cloned()
            .ok_or_else(|| PipelineError::Storage(format!("image key {} not found", image_key)))
    }

    async fn put(&self, image_key: String, bytes: Vec<u8>) -> Result<(), PipelineError> {
        self.inner.write().await.insert(image_key, bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get_roundtrips() {
        let store = InMemoryImageStore::new();
        store.put("page-0".to_string(), vec![1, 2, 3]).await.unwrap();
        let bytes = store.get("page-0").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_get_missing_key_errors() {
        let store = InMemoryImageStore::new();
        let result = store.get("missing").await;
        assert!(matches!(result, Err(PipelineError::Storage(_))));
    }
}
