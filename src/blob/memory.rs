//! In-process blob store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{BlobError, BlobLocation, BlobStore};

/// Blob store backed by a concurrent map.
///
/// Can be switched offline to exercise backend-failure paths.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: DashMap<BlobLocation, Bytes>,
    next_id: AtomicU64,
    offline: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a blob at a caller-chosen location.
    pub fn insert(&self, location: BlobLocation, data: impl Into<Bytes>) {
        self.blobs.insert(location, data.into());
    }

    /// Make every subsequent operation fail with [`BlobError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn check_online(&self) -> Result<(), BlobError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn load(&self, location: &BlobLocation) -> Result<Bytes, BlobError> {
        self.check_online()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.blobs
            .get(location)
            .map(|b| b.clone())
            .ok_or_else(|| BlobError::NotFound(location.clone()))
    }

    async fn store(&self, data: Bytes) -> Result<BlobLocation, BlobError> {
        self.check_online()?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let location = BlobLocation::new(format!("mem:{id}"));
        self.blobs.insert(location.clone(), data);
        Ok(location)
    }

    async fn delete(&self, location: &BlobLocation) -> Result<bool, BlobError> {
        self.check_online()?;
        Ok(self.blobs.remove(location).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_then_load() {
        let store = InMemoryBlobStore::new();
        let loc = store.store(Bytes::from_static(b"weights")).await.unwrap();
        assert_eq!(store.load(&loc).await.unwrap(), Bytes::from_static(b"weights"));
        assert!(store.delete(&loc).await.unwrap());
        assert!(matches!(store.load(&loc).await, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_offline_fails() {
        let store = InMemoryBlobStore::new();
        store.insert(BlobLocation::new("seed"), vec![1u8, 2, 3]);
        store.set_offline(true);
        assert!(matches!(
            store.load(&BlobLocation::new("seed")).await,
            Err(BlobError::Unavailable(_))
        ));
    }
}
