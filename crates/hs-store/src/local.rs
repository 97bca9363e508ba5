//! Filesystem blob store on `object_store`'s local backend.

use async_trait::async_trait;
use hs_types::{config_error, BlobUri, HsError, HsResult};
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::blob::{check_scheme, BlobStore};
use crate::objects;

/// Blob store backed by a directory tree: `root/bucket/object`.
///
/// Handy for running the whole pipeline on one machine or against a shared
/// volume mounted into every worker pod.
#[derive(Debug)]
pub struct LocalBlobStore {
    pub root: PathBuf,
    fs: LocalFileSystem,
}

impl LocalBlobStore {
    pub const SCHEME: &'static str = "file";

    pub fn new<P: AsRef<Path>>(root: P) -> HsResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let fs = LocalFileSystem::new_with_prefix(&root)
            .map_err(|e| config_error!("cannot use {} as blob root: {e}", root.display()))?;

        Ok(Self { root, fs })
    }

    /// `bucket/object` as a path under the root.
    fn object_path(&self, uri: &BlobUri) -> HsResult<ObjectPath> {
        if uri.bucket.is_empty() || uri.bucket.contains('/') {
            return Err(HsError::InvalidUri(uri.to_string()));
        }
        objects::object_path(uri, &format!("{}/{}", uri.bucket, uri.object))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn scheme(&self) -> &str {
        Self::SCHEME
    }

    async fn upload(&self, bucket: &str, object: &str, bytes: Vec<u8>) -> HsResult<BlobUri> {
        let uri = self.uri(bucket, object);
        let path = self.object_path(&uri)?;
        let size = bytes.len();

        // Staged and renamed by the backend, so `exists` never sees a torn object.
        objects::put(&self.fs, &uri, &path, bytes).await?;
        debug!("Wrote {} bytes to {}", size, uri);
        Ok(uri)
    }

    async fn download(&self, bucket: &str, object: &str) -> HsResult<Vec<u8>> {
        let uri = self.uri(bucket, object);
        let path = self.object_path(&uri)?;
        objects::get(&self.fs, &uri, &path).await
    }

    async fn exists(&self, uri: &BlobUri) -> HsResult<bool> {
        check_scheme(self.scheme(), uri)?;
        let path = self.object_path(uri)?;
        objects::exists(&self.fs, uri, &path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hs_types::TransportError;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_roundtrip() {
        let temp_dir = tempdir().unwrap();
        let store = LocalBlobStore::new(temp_dir.path()).unwrap();

        let uri = store
            .upload("hpsearch", "task/0/fitted_search.json", b"{}".to_vec())
            .await
            .unwrap();

        assert_eq!(uri.to_string(), "file://hpsearch/task/0/fitted_search.json");
        assert!(store.exists(&uri).await.unwrap());
        assert!(temp_dir
            .path()
            .join("hpsearch/task/0/fitted_search.json")
            .is_file());
        assert_eq!(store.download_uri(&uri).await.unwrap(), b"{}".to_vec());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let temp_dir = tempdir().unwrap();
        let store = LocalBlobStore::new(temp_dir.path()).unwrap();

        store.upload("b", "state.json", b"1".to_vec()).await.unwrap();
        store.upload("b", "state.json", b"2".to_vec()).await.unwrap();

        assert_eq!(store.download("b", "state.json").await.unwrap(), b"2".to_vec());
    }

    #[tokio::test]
    async fn test_missing_object() {
        let temp_dir = tempdir().unwrap();
        let store = LocalBlobStore::new(temp_dir.path()).unwrap();

        assert!(!store.exists(&store.uri("b", "absent")).await.unwrap());
        assert!(matches!(
            store.download("b", "absent").await,
            Err(HsError::Transport(TransportError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_escape() {
        let temp_dir = tempdir().unwrap();
        let store = LocalBlobStore::new(temp_dir.path()).unwrap();

        let result = store.upload("b", "../outside", Vec::new()).await;
        assert!(matches!(result, Err(HsError::InvalidUri(_))));
    }

    #[tokio::test]
    async fn test_rejects_nested_bucket() {
        let temp_dir = tempdir().unwrap();
        let store = LocalBlobStore::new(temp_dir.path()).unwrap();

        let result = store.upload("a/b", "x.json", Vec::new()).await;
        assert!(matches!(result, Err(HsError::InvalidUri(_))));
    }
}
