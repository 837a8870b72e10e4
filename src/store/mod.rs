//! Artifact storage abstraction.
//!
//! The engine only needs a key-value byte store with list/delete and one
//! conditional primitive (`create_if_absent`, backing the run lock). Keys are
//! logical, `/`-separated, relative to the store root, e.g.
//! `run-20260310-090000Z/fleet_summary.json`. Artifacts are write-once by
//! convention; a new fact gets a new key.

pub mod lock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("invalid artifact key: {0}")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Minimal byte store interface. Implementations must be safe to share
/// across detection worker tasks.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    /// All keys under `prefix`, in ascending lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
    async fn delete_prefix(&self, prefix: &str) -> Result<(), StoreError>;
    /// Conditional write: returns true if the key was created, false if it
    /// already existed. This is the sole concurrency-control primitive.
    /// The key must appear with its full payload or not at all; a reader
    /// that observes the key sees the complete data.
    async fn create_if_absent(&self, key: &str, data: &[u8]) -> Result<bool, StoreError>;
    /// Last modification time of a key.
    async fn modified(&self, key: &str) -> Result<DateTime<Utc>, StoreError>;
}

/// Read and decode a JSON artifact.
pub async fn read_json<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    key: &str,
) -> anyhow::Result<T> {
    let bytes = store.get(key).await?;
    let value = serde_json::from_slice(&bytes)
        .map_err(|e| anyhow::anyhow!("failed to decode {key}: {e}"))?;
    Ok(value)
}

/// Encode and write a JSON artifact (pretty-printed, stable field order).
pub async fn write_json<T: Serialize>(
    store: &dyn ArtifactStore,
    key: &str,
    value: &T,
) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    store.put(key, &bytes).await?;
    Ok(())
}

/// Filesystem-backed store. Keys map to paths under a root directory.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() {
            return Ok(self.root.clone());
        }
        let mut path = self.root.clone();
        for component in key.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(StoreError::InvalidKey(key.to_string()));
            }
            path.push(component);
        }
        Ok(path)
    }

    fn walk(root: &Path, dir: &Path, keys: &mut Vec<String>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                Self::walk(root, &path, keys)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                keys.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let root = self.root.clone();
        let start = self.path_for(prefix)?;
        let prefix = prefix.to_string();
        let keys = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<String>> {
            let mut keys = Vec::new();
            if start.is_file() {
                keys.push(prefix);
            } else if start.is_dir() {
                LocalStore::walk(&root, &start, &mut keys)?;
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| std::io::Error::other(e))??;
        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let path = self.path_for(prefix)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await?,
            Ok(_) => tokio::fs::remove_file(&path).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn create_if_absent(&self, key: &str, data: &[u8]) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Stage the full payload, then link it into place. The link either
        // succeeds with the payload already complete or fails because the
        // key exists; readers never observe a partially written marker.
        let staged = path.with_file_name(format!(".stage-{}", Uuid::new_v4()));
        tokio::fs::write(&staged, data).await?;
        let outcome = match tokio::fs::hard_link(&staged, &path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        };
        let _ = tokio::fs::remove_file(&staged).await;
        outcome
    }

    async fn modified(&self, key: &str) -> Result<DateTime<Utc>, StoreError> {
        let path = self.path_for(key)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let mtime = meta.modified()?;
        Ok(DateTime::<Utc>::from(mtime))
    }
}
