//! Blob operations on top of an `object_store` backend.

use hs_types::{BlobUri, HsError, HsResult, TransportError};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};

/// Parse an object name into a store path. Empty, `.` and `..` segments are
/// rejected.
pub(crate) fn object_path(uri: &BlobUri, name: &str) -> HsResult<Path> {
    Path::parse(name).map_err(|e| HsError::InvalidUri(format!("{uri}: {e}")))
}

fn transport_error(uri: &BlobUri, error: object_store::Error) -> HsError {
    match error {
        object_store::Error::NotFound { .. } => TransportError::NotFound {
            uri: uri.to_string(),
        }
        .into(),
        other => TransportError::blob(uri.to_string(), other).into(),
    }
}

pub(crate) async fn put(
    store: &dyn ObjectStore,
    uri: &BlobUri,
    path: &Path,
    bytes: Vec<u8>,
) -> HsResult<()> {
    store
        .put(path, PutPayload::from(bytes))
        .await
        .map_err(|e| transport_error(uri, e))?;
    Ok(())
}

pub(crate) async fn get(store: &dyn ObjectStore, uri: &BlobUri, path: &Path) -> HsResult<Vec<u8>> {
    let result = store.get(path).await.map_err(|e| transport_error(uri, e))?;
    let bytes = result.bytes().await.map_err(|e| transport_error(uri, e))?;
    Ok(bytes.to_vec())
}

pub(crate) async fn exists(store: &dyn ObjectStore, uri: &BlobUri, path: &Path) -> HsResult<bool> {
    match store.head(path).await {
        Ok(_) => Ok(true),
        Err(object_store::Error::NotFound { .. }) => Ok(false),
        Err(e) => Err(TransportError::blob(uri.to_string(), e).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn missing_objects_map_to_not_found() {
        let store = InMemory::new();
        let uri = BlobUri::new("gs", "b", "task/absent.json");
        let path = object_path(&uri, &uri.object).unwrap();

        assert!(!exists(&store, &uri, &path).await.unwrap());
        match get(&store, &uri, &path).await {
            Err(HsError::Transport(TransportError::NotFound { uri })) => {
                assert_eq!(uri, "gs://b/task/absent.json")
            }
            other => panic!("expected NotFound, got {other:?}"),
        }

        put(&store, &uri, &path, b"{}".to_vec()).await.unwrap();
        assert!(exists(&store, &uri, &path).await.unwrap());
        assert_eq!(get(&store, &uri, &path).await.unwrap(), b"{}".to_vec());
    }

    #[test]
    fn traversal_segments_are_invalid() {
        let uri = BlobUri::new("file", "b", "../x");
        assert!(matches!(object_path(&uri, "../x"), Err(HsError::InvalidUri(_))));
        assert!(matches!(object_path(&uri, "a//x"), Err(HsError::InvalidUri(_))));
        assert!(object_path(&uri, "task/0/param_grid.json").is_ok());
    }
}
