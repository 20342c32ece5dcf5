use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};

use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Object store for page screenshots. Images live under
/// `{document_id}/page_{page_number}.{ext}` so a whole document can be
/// dropped with one prefix delete.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
}

impl StorageManager {
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage;
        let (store, local_base) = create_storage_backend(cfg).await?;

        Ok(Self {
            store,
            backend_kind,
            local_base,
        })
    }

    /// Create a StorageManager with a custom storage backend, for tests.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
            local_base: None,
        }
    }

    /// Canonical location of a page screenshot.
    pub fn page_image_location(document_id: &str, page_number: u32) -> String {
        format!("{document_id}/page_{page_number}.jpg")
    }

    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    /// Delete all objects below the specified prefix, returning how many
    /// were removed. For the local backend, empty directories are cleaned
    /// up afterwards.
    pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<usize> {
        let prefix_path = ObjPath::from(prefix);
        let locations = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|m| m.location)
            .boxed();
        let deleted = self
            .store
            .delete_stream(locations)
            .try_collect::<Vec<_>>()
            .await?
            .len();

        if matches!(self.backend_kind, StorageKind::Local) {
            self.cleanup_filesystem_directories(prefix).await?;
        }

        Ok(deleted)
    }

    /// Cleanup filesystem directories for local backend. Best effort.
    async fn cleanup_filesystem_directories(&self, prefix: &str) -> object_store::Result<()> {
        let Some(base) = &self.local_base else {
            return Ok(());
        };

        let relative = Path::new(prefix);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            tracing::warn!(
                prefix = %prefix,
                "Skipping directory cleanup for unsupported prefix components"
            );
            return Ok(());
        }

        let mut current = base.join(relative);

        while current.starts_with(base) && current.as_path() != base.as_path() {
            match tokio::fs::remove_dir(&current).await {
                Ok(_) => {}
                Err(err) => match err.kind() {
                    ErrorKind::NotFound => {}
                    ErrorKind::DirectoryNotEmpty => break,
                    _ => tracing::debug!(
                        error = %err,
                        path = %current.display(),
                        "Failed to remove directory during cleanup"
                    ),
                },
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(())
    }
}

/// Create a storage backend based on configuration.
async fn create_storage_backend(
    cfg: &AppConfig,
) -> object_store::Result<(DynStore, Option<PathBuf>)> {
    match cfg.storage {
        StorageKind::Local => {
            let base = PathBuf::from(&cfg.image_dir);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base.clone())?;
            Ok((Arc::new(store), Some(base)))
        }
        StorageKind::Memory => {
            let store = InMemory::new();
            Ok((Arc::new(store), None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> StorageManager {
        StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Memory)
    }

    #[test]
    fn test_page_image_location() {
        assert_eq!(
            StorageManager::page_image_location("doc123", 7),
            "doc123/page_7.jpg"
        );
    }

    #[tokio::test]
    async fn test_put_get_exists_roundtrip() {
        let storage = memory_store();
        let location = StorageManager::page_image_location("doc123", 1);

        assert!(!storage.exists(&location).await.expect("exists"));

        storage
            .put(&location, Bytes::from_static(b"jpeg bytes"))
            .await
            .expect("put");

        assert!(storage.exists(&location).await.expect("exists"));
        let fetched = storage.get(&location).await.expect("get");
        assert_eq!(fetched, Bytes::from_static(b"jpeg bytes"));
    }

    #[tokio::test]
    async fn test_delete_prefix_counts_and_isolates() {
        let storage = memory_store();
        for page in 1..=3u32 {
            storage
                .put(
                    &StorageManager::page_image_location("doc123", page),
                    Bytes::from_static(b"img"),
                )
                .await
                .expect("put");
        }
        storage
            .put(
                &StorageManager::page_image_location("other_doc", 1),
                Bytes::from_static(b"img"),
            )
            .await
            .expect("put");

        let deleted = storage.delete_prefix("doc123").await.expect("delete");
        assert_eq!(deleted, 3);

        assert!(!storage
            .exists(&StorageManager::page_image_location("doc123", 1))
            .await
            .expect("exists"));
        assert!(storage
            .exists(&StorageManager::page_image_location("other_doc", 1))
            .await
            .expect("exists"));
    }

    #[tokio::test]
    async fn test_local_delete_prefix_cleans_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let local = StorageManager {
            store: Arc::new(
                LocalFileSystem::new_with_prefix(dir.path()).expect("local store"),
            ),
            backend_kind: StorageKind::Local,
            local_base: Some(dir.path().to_path_buf()),
        };

        let location = StorageManager::page_image_location("doc123", 1);
        local
            .put(&location, Bytes::from_static(b"img"))
            .await
            .expect("put");
        assert!(dir.path().join("doc123").is_dir());

        let deleted = local.delete_prefix("doc123").await.expect("delete");
        assert_eq!(deleted, 1);
        assert!(!dir.path().join("doc123").exists());
    }
}
