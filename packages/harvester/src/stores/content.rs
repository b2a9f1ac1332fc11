//! Content stores.
//!
//! - `FsContentStore` - files under a root directory
//! - `MemoryContentStore` - in-memory map, for tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::ContentStore;
use crate::types::content::{ContentKey, StoredContent};

/// Filesystem content store rooted at a directory.
///
/// Puts write a sibling temp file and rename it into place, so readers
/// see either the old bytes or the new ones.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &ContentKey) -> PathBuf {
        self.root.join(key.relative_path())
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn put(&self, key: &ContentKey, bytes: &[u8]) -> StoreResult<StoredContent> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        let tmp = path.with_file_name(tmp_name);

        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(path = %path.display(), bytes = bytes.len(), "content stored");
        Ok(StoredContent {
            path: path.to_string_lossy().into_owned(),
            size_bytes: bytes.len() as u64,
        })
    }

    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found("content", path))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory content store keyed by relative path.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    puts: RwLock<usize>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful puts so far.
    pub fn put_count(&self) -> usize {
        self.puts.read().map(|p| *p).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, key: &ContentKey, bytes: &[u8]) -> StoreResult<StoredContent> {
        let path = key.relative_path();
        self.blobs
            .write()
            .map_err(|_| StoreError::poisoned())?
            .insert(path.clone(), bytes.to_vec());
        *self.puts.write().map_err(|_| StoreError::poisoned())? += 1;
        Ok(StoredContent {
            path,
            size_bytes: bytes.len() as u64,
        })
    }

    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.blobs
            .read()
            .map_err(|_| StoreError::poisoned())?
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::not_found("content", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_layout_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());
        let key = ContentKey::new("tax_rulings", 2024, 5, "cosit_2024_0001", "html");

        let first = store.put(&key, b"v1").await.unwrap();
        assert!(first.path.ends_with("tax_rulings/2024/05/cosit_2024_0001.html"));
        assert_eq!(first.size_bytes, 2);

        let second = store.put(&key, b"version 2").await.unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(store.get(&second.path).await.unwrap(), b"version 2");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("tax_rulings/2024/05"))
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_content_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());
        let missing = dir.path().join("nope.html");
        let err = store.get(&missing.to_string_lossy()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_memory_store_counts_puts() {
        let store = MemoryContentStore::new();
        let key = ContentKey::new("s", 2024, 1, "a", "txt");
        store.put(&key, b"x").await.unwrap();
        store.put(&key, b"y").await.unwrap();
        assert_eq!(store.put_count(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("s/2024/01/a.txt").await.unwrap(), b"y");
    }
}
