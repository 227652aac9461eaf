// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Blob storage contract and implementations.
//!
//! The executor only ever talks to the [`BlobStore`] trait. The local
//! filesystem store backs single-node deployments; the in-memory store
//! backs tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Blob store failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid object key
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Write-only object store for produced images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist one object and return its public URL.
    async fn put(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<String, StorageError>;
}

/// File extension for a MIME type, defaulting to `bin`.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// Filesystem-backed blob store.
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    /// Create a store rooted at `root`, serving objects under
    /// `public_base_url`.
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, _mime: &str, bytes: &[u8]) -> Result<String, StorageError> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(format!("{}/{}", self.public_base_url, key))
    }
}

/// In-memory blob store for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// Fetch a stored object by key.
    pub fn get(&self, key: &str) -> Option<(String, Vec<u8>)> {
        self.objects.lock().get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<String, StorageError> {
        self.objects
            .lock()
            .insert(key.to_string(), (mime.to_string(), bytes.to_vec()));
        Ok(format!("memory://{key}"))
    }
}
