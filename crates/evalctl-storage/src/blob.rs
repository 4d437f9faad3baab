use async_trait::async_trait;
use evalctl_types::EvalId;

use crate::error::StorageError;

/// Out-of-band storage for outputs exceeding the inline preview threshold
/// (§3.2: "Large outputs are exclusively owned by the blob backend").
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` under the deterministic key for `eval_id` (§4.2:
    /// "deterministic key derived from eval_id") and return that key.
    async fn put(&self, eval_id: &EvalId, bytes: &[u8]) -> Result<String, StorageError>;

    /// Read the full blob back by key.
    async fn get(&self, location: &str) -> Result<Vec<u8>, StorageError>;
}

/// The persisted-state-layout key: `eval_id/output` (§6).
pub fn blob_key(eval_id: &EvalId) -> String {
    format!("{eval_id}/output")
}

/// In-memory blob store for tests and single-process development.
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: dashmap::DashMap<String, Vec<u8>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, eval_id: &EvalId, bytes: &[u8]) -> Result<String, StorageError> {
        let key = blob_key(eval_id);
        self.objects.insert(key.clone(), bytes.to_vec());
        Ok(key)
    }

    async fn get(&self, location: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .get(location)
            .map(|entry| entry.clone())
            .ok_or_else(|| StorageError::BlobUnavailable(format!("no object at {location}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_blob_under_its_deterministic_key() {
        let store = InMemoryBlobStore::new();
        let eval_id = EvalId::generate();
        let key = store.put(&eval_id, b"hello").await.unwrap();
        assert_eq!(key, blob_key(&eval_id));
        assert_eq!(store.get(&key).await.unwrap(), b"hello");
    }
}
