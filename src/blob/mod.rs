//! Blob store port used for promotion and demotion.
//!
//! - [`memory`]: in-process store, used when no blob root is configured and in tests
//! - [`fs`]: sharded filesystem store
//! - [`codec`]: zstd decorator applied to blobs written by demotion

pub mod codec;
pub mod fs;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use codec::CompressedBlobStore;
pub use fs::FsBlobStore;
pub use memory::InMemoryBlobStore;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blob not found: {0}")]
    NotFound(BlobLocation),

    #[error("Invalid blob location: {0}")]
    InvalidLocation(BlobLocation),

    #[error("Blob store unavailable: {0}")]
    Unavailable(String),
}

/// Opaque reference to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobLocation(pub String);

impl BlobLocation {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backing store for payload bytes outside the Memory tier.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a blob.
    async fn load(&self, location: &BlobLocation) -> Result<Bytes, BlobError>;

    /// Write a blob and return where it landed.
    async fn store(&self, data: Bytes) -> Result<BlobLocation, BlobError>;

    /// Remove a blob. Returns whether it existed.
    async fn delete(&self, location: &BlobLocation) -> Result<bool, BlobError>;
}
