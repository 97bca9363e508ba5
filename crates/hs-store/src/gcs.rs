//! Google Cloud Storage blob store on `object_store`.

use async_trait::async_trait;
use dashmap::DashMap;
use hs_types::{config_error, BlobUri, HsResult};
use object_store::gcp::{GcpCredential, GoogleCloudStorageBuilder};
use object_store::{ObjectStore, StaticCredentialProvider};
use std::sync::Arc;
use tracing::debug;

use crate::blob::{check_scheme, BlobStore};
use crate::objects;

/// Blob store over Cloud Storage. One client is built per bucket on first
/// use and kept for the life of the store.
#[derive(Debug)]
pub struct GcsBlobStore {
    builder: GoogleCloudStorageBuilder,
    buckets: DashMap<String, Arc<dyn ObjectStore>>,
}

impl GcsBlobStore {
    pub const SCHEME: &'static str = "gs";

    /// Credentials from `GOOGLE_*` variables, application default
    /// credentials, or the instance metadata server.
    pub fn from_env() -> Self {
        Self::with_builder(GoogleCloudStorageBuilder::from_env())
    }

    /// Authenticate every request with a caller-supplied OAuth token.
    pub fn with_token(access_token: impl Into<String>) -> Self {
        let credentials = StaticCredentialProvider::new(GcpCredential {
            bearer: access_token.into(),
        });
        Self::with_builder(GoogleCloudStorageBuilder::from_env().with_credentials(Arc::new(credentials)))
    }

    pub fn with_builder(builder: GoogleCloudStorageBuilder) -> Self {
        Self {
            builder,
            buckets: DashMap::new(),
        }
    }

    fn bucket(&self, bucket: &str) -> HsResult<Arc<dyn ObjectStore>> {
        let store = self
            .buckets
            .entry(bucket.to_string())
            .or_try_insert_with(|| -> HsResult<Arc<dyn ObjectStore>> {
                let store = self
                    .builder
                    .clone()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| config_error!("cannot open gs://{bucket}: {e}"))?;
                Ok(Arc::new(store))
            })?
            .clone();
        Ok(store)
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    fn scheme(&self) -> &str {
        Self::SCHEME
    }

    async fn upload(&self, bucket: &str, object: &str, bytes: Vec<u8>) -> HsResult<BlobUri> {
        let uri = self.uri(bucket, object);
        let path = objects::object_path(&uri, object)?;
        let size = bytes.len();

        objects::put(self.bucket(bucket)?.as_ref(), &uri, &path, bytes).await?;
        debug!("Uploaded {} bytes to {}", size, uri);
        Ok(uri)
    }

    async fn download(&self, bucket: &str, object: &str) -> HsResult<Vec<u8>> {
        let uri = self.uri(bucket, object);
        let path = objects::object_path(&uri, object)?;
        objects::get(self.bucket(bucket)?.as_ref(), &uri, &path).await
    }

    async fn exists(&self, uri: &BlobUri) -> HsResult<bool> {
        check_scheme(self.scheme(), uri)?;
        let path = objects::object_path(uri, &uri.object)?;
        objects::exists(self.bucket(&uri.bucket)?.as_ref(), uri, &path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_client_per_bucket() {
        let store = GcsBlobStore::with_token("token");
        let first = store.bucket("hpsearch").unwrap();
        let again = store.bucket("hpsearch").unwrap();
        let other = store.bucket("other").unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(store.buckets.len(), 2);
    }

    #[test]
    fn uris_use_gs_scheme() {
        let store = GcsBlobStore::with_token("token");
        assert_eq!(store.uri("b", "t/x.json").to_string(), "gs://b/t/x.json");
    }

    #[tokio::test]
    async fn foreign_scheme_is_rejected_before_any_request() {
        let store = GcsBlobStore::with_token("token");
        let uri = BlobUri::new("file", "b", "x");
        assert!(matches!(
            store.exists(&uri).await,
            Err(hs_types::HsError::InvalidUri(_))
        ));
    }
}
