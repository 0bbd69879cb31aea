//! Filesystem blob store.
//!
//! Blobs are written under a root directory with a two-level layout
//! (`<root>/<shard>/<uuid>.blob`) to avoid too many files in one directory.
//! Uses tokio's async file I/O.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{BlobError, BlobLocation, BlobStore};

const LOCATION_PREFIX: &str = "fs:";

#[derive(Debug, Default)]
pub struct FsIoStats {
    pub total_writes: AtomicU64,
    pub total_reads: AtomicU64,
    pub total_bytes_written: AtomicU64,
    pub total_bytes_read: AtomicU64,
}

/// Blob store rooted at a local (or mounted) directory.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    stats: FsIoStats,
}

impl FsBlobStore {
    /// Create the store, ensuring the root directory exists.
    pub async fn new(root: PathBuf) -> Result<Self, BlobError> {
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            stats: FsIoStats::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats(&self) -> &FsIoStats {
        &self.stats
    }

    /// Resolve a location to a path under the root, rejecting anything that
    /// would escape it.
    fn resolve(&self, location: &BlobLocation) -> Result<PathBuf, BlobError> {
        let relative = location
            .as_str()
            .strip_prefix(LOCATION_PREFIX)
            .ok_or_else(|| BlobError::InvalidLocation(location.clone()))?;
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(BlobError::InvalidLocation(location.clone()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn load(&self, location: &BlobLocation) -> Result<Bytes, BlobError> {
        let path = self.resolve(location)?;
        if !fs::try_exists(&path).await? {
            return Err(BlobError::NotFound(location.clone()));
        }

        let data = fs::read(&path).await?;
        self.stats.total_reads.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_read
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        debug!(location = %location, size = data.len(), "Read blob from disk");
        Ok(Bytes::from(data))
    }

    async fn store(&self, data: Bytes) -> Result<BlobLocation, BlobError> {
        let id = Uuid::new_v4().simple().to_string();
        let shard = &id[..2];
        let relative = format!("{shard}/{id}.blob");
        let path = self.root.join(&relative);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data).await?;

        self.stats.total_writes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        let location = BlobLocation::new(format!("{LOCATION_PREFIX}{relative}"));
        debug!(location = %location, size = data.len(), "Wrote blob to disk");
        Ok(location)
    }

    async fn delete(&self, location: &BlobLocation) -> Result<bool, BlobError> {
        let path = self.resolve(location)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
