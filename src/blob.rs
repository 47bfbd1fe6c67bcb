use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Error;

/// Opaque blob storage. Only ever sees ciphertext.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` and returns the path to fetch them from.
    async fn put(&self, bytes: Vec<u8>) -> Result<String, Error>;

    /// Fetches the blob at `path`.
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, Error>;
}

/// In-process [`BlobStore`].
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<String, Error> {
        let mut blobs = self.blobs.write().await;
        let path = format!("blob/{}", blobs.len());
        blobs.insert(path.clone(), bytes);
        Ok(path)
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.blobs.read().await.get(path).cloned())
    }
}
