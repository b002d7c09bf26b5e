//! Object storage abstraction for persisted records and the DLQ.
//!
//! Wraps an `object_store` backend selected from a URL:
//! - `/abs/path`, `file:///abs/path`, `file:/abs/path`: local filesystem
//! - `memory://`: process-local in-memory store

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use regex::Regex;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::error::{InvalidUrlSnafu, IoSnafu, ObjectStoreSnafu, StorageError};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

static LOCAL_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:file://|file:)?(?P<path>/.*)$").expect("local url pattern is valid")
});

const MEMORY_URL: &str = "memory://";

/// Backend selected by a storage URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Local { path: String },
    Memory,
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        if url == MEMORY_URL {
            return Ok(BackendConfig::Memory);
        }
        let caps = LOCAL_URL
            .captures(url)
            .context(InvalidUrlSnafu { url })?;
        let path = caps["path"].trim_end_matches('/');
        Ok(BackendConfig::Local {
            path: if path.is_empty() { "/" } else { path }.to_string(),
        })
    }
}

/// Storage provider over a single object store root.
#[derive(Clone)]
pub struct StorageProvider {
    object_store: Arc<dyn ObjectStore>,
    canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL.
    ///
    /// Local directories are created if missing. `options` are accepted for
    /// config compatibility; the supported backends take none.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        if !options.is_empty() {
            debug!(url, "Ignoring {} storage options", options.len());
        }
        match BackendConfig::parse_url(url)? {
            BackendConfig::Memory => Ok(Self::in_memory()),
            BackendConfig::Local { path } => {
                tokio::fs::create_dir_all(&path).await.context(IoSnafu)?;
                let store = LocalFileSystem::new_with_prefix(&path).context(ObjectStoreSnafu)?;
                Ok(Self {
                    canonical_url: format!("file://{path}"),
                    object_store: Arc::new(store),
                })
            }
        }
    }

    /// A fresh, empty in-memory store.
    pub fn in_memory() -> Self {
        Self {
            object_store: Arc::new(InMemory::new()),
            canonical_url: MEMORY_URL.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.canonical_url
    }

    /// Write an object, replacing any existing one at `path`.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        self.object_store
            .put(path, payload)
            .await
            .context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Read an object.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        self.object_store
            .get(path)
            .await
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)
    }

    /// List objects under `prefix` (or the whole root), sorted by path.
    pub async fn list(&self, prefix: Option<&Path>) -> Result<Vec<Path>, StorageError> {
        let mut paths: Vec<Path> = self
            .object_store
            .list(prefix)
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
            .context(ObjectStoreSnafu)?;
        paths.sort();
        Ok(paths)
    }

    /// Delete an object. Missing objects are not an error.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        match self.object_store.delete(path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(source) => Err(StorageError::ObjectStore { source }),
        }
    }
}
