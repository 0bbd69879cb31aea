//! zstd compression for blobs written by demotion.
//!
//! Wraps another store. Compressed blobs carry a `zstd:` location prefix so
//! that raw blobs produced by ingestion stay readable through the same store.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{BlobError, BlobLocation, BlobStore};

const ZSTD_PREFIX: &str = "zstd:";

pub struct CompressedBlobStore {
    inner: Arc<dyn BlobStore>,
    level: i32,
}

impl CompressedBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>, level: i32) -> Self {
        Self { inner, level }
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, BlobError> {
        Ok(zstd::encode_all(data, self.level)?)
    }

    fn decompress(data: &[u8]) -> Result<Vec<u8>, BlobError> {
        Ok(zstd::decode_all(data)?)
    }
}

#[async_trait]
impl BlobStore for CompressedBlobStore {
    async fn load(&self, location: &BlobLocation) -> Result<Bytes, BlobError> {
        match location.as_str().strip_prefix(ZSTD_PREFIX) {
            Some(inner) => {
                let compressed = self.inner.load(&BlobLocation::new(inner)).await?;
                Ok(Bytes::from(Self::decompress(&compressed)?))
            }
            None => self.inner.load(location).await,
        }
    }

    async fn store(&self, data: Bytes) -> Result<BlobLocation, BlobError> {
        let compressed = self.compress(&data)?;
        let location = self.inner.store(Bytes::from(compressed)).await?;
        Ok(BlobLocation::new(format!("{ZSTD_PREFIX}{location}")))
    }

    async fn delete(&self, location: &BlobLocation) -> Result<bool, BlobError> {
        let inner = location.as_str().strip_prefix(ZSTD_PREFIX).unwrap_or(location.as_str());
        self.inner.delete(&BlobLocation::new(inner)).await
    }
}
