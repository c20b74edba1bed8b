use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::error::StorageError;
use crate::storage_traits::{CasStore, ContentDigest, StorageResult};

/// Artifact blobs on local disk, one file per digest under
/// `<root>/objects/ab/cdef...`.
pub struct FsCasStore {
    objects_dir: PathBuf,
}

impl FsCasStore {
    /// Open (creating if missing) the store under `root`.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let objects_dir = root.as_ref().join("objects");
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir })
    }

    fn blob_path(&self, digest: &ContentDigest) -> PathBuf {
        let hex = digest.as_str();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }
}

/// Runs blocking filesystem work off the async worker threads.
async fn blocking<T, F>(f: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Backend(format!("blob task failed: {e}")))?
}

fn write_blob(path: &Path, data: &[u8]) -> StorageResult<()> {
    if path.exists() {
        return Ok(());
    }

    let shard_dir = path
        .parent()
        .ok_or_else(|| StorageError::Backend(format!("bad blob path {}", path.display())))?;
    fs::create_dir_all(shard_dir)?;

    // rename within the shard dir keeps readers from seeing partial blobs
    let mut tmp = NamedTempFile::new_in(shard_dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn read_blob(path: &Path, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
    fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound {
                digest: digest.to_string(),
            }
        } else {
            StorageError::Io(e)
        }
    })
}

#[async_trait]
impl CasStore for FsCasStore {
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest> {
        let digest = ContentDigest::from_bytes(data);
        let path = self.blob_path(&digest);
        let data = data.to_vec();
        blocking(move || write_blob(&path, &data)).await?;
        Ok(digest)
    }

    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        let path = self.blob_path(digest);
        let digest = digest.clone();
        blocking(move || read_blob(&path, &digest)).await
    }

    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool> {
        let path = self.blob_path(digest);
        blocking(move || Ok(path.exists())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsCasStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCasStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn blob_roundtrip() {
        let (_dir, store) = make_store();
        let digest = store.put(b"public class Order {}").await.unwrap();
        let got = store.get(&digest).await.unwrap();
        assert_eq!(got, b"public class Order {}");
    }

    #[tokio::test]
    async fn dedupe_invariant() {
        let (dir, store) = make_store();
        let d1 = store.put(b"duplicate me").await.unwrap();
        let d2 = store.put(b"duplicate me").await.unwrap();
        assert_eq!(d1, d2);

        let hex = d1.as_str();
        let shard = dir.path().join("objects").join(&hex[..2]);
        let entries: Vec<_> = std::fs::read_dir(shard).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn get_nonexistent_returns_not_found() {
        let (_dir, store) = make_store();
        let missing = ContentDigest::from_bytes(b"never stored");
        let err = store.get(&missing).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        assert!(!store.contains(&missing).await.unwrap());
    }

    #[tokio::test]
    async fn blobs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let digest = {
            let store = FsCasStore::new(dir.path()).unwrap();
            store.put(b"persisted").await.unwrap()
        };
        let reopened = FsCasStore::new(dir.path()).unwrap();
        assert_eq!(reopened.get(&digest).await.unwrap(), b"persisted");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_puts_from_spawned_tasks() {
        let (_dir, store) = make_store();
        let store = std::sync::Arc::new(store);
        let writes: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.put(format!("blob {i}").as_bytes()).await })
            })
            .collect();
        for write in writes {
            let digest = write.await.unwrap().unwrap();
            assert!(store.contains(&digest).await.unwrap());
        }
    }
}
