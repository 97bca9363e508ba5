//! Blob store abstraction and the in-memory store.

use async_trait::async_trait;
use dashmap::DashMap;
use hs_types::{BlobUri, HsError, HsResult, PayloadFormat, TransportError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Object storage used to hand inputs and results between the orchestrator
/// and its workers.
///
/// Implementations own their credentials; callers only ever see bucket and
/// object names.
#[async_trait]
pub trait BlobStore: Send + Sync + std::fmt::Debug {
    /// URI scheme this store answers to (e.g. `gs`).
    fn scheme(&self) -> &str;

    /// Write `bytes` to `bucket/object`, replacing any existing object.
    async fn upload(&self, bucket: &str, object: &str, bytes: Vec<u8>) -> HsResult<BlobUri>;

    /// Read the whole object. Missing objects are a [`TransportError::NotFound`].
    async fn download(&self, bucket: &str, object: &str) -> HsResult<Vec<u8>>;

    /// Whether the object behind `uri` exists.
    async fn exists(&self, uri: &BlobUri) -> HsResult<bool>;

    async fn download_uri(&self, uri: &BlobUri) -> HsResult<Vec<u8>> {
        check_scheme(self.scheme(), uri)?;
        self.download(&uri.bucket, &uri.object).await
    }

    fn uri(&self, bucket: &str, object: &str) -> BlobUri {
        BlobUri::new(self.scheme(), bucket, object)
    }
}

/// Reject URIs that belong to a different store.
pub fn check_scheme(scheme: &str, uri: &BlobUri) -> HsResult<()> {
    if uri.scheme != scheme {
        return Err(HsError::InvalidUri(format!(
            "{uri} cannot be served by a {scheme}:// store"
        )));
    }
    Ok(())
}

/// Encode `value` with `format` and upload it.
pub async fn upload_encoded<T: Serialize + Sync>(
    store: &dyn BlobStore,
    format: PayloadFormat,
    bucket: &str,
    object: &str,
    value: &T,
) -> HsResult<BlobUri> {
    let bytes = format.encode(value)?;
    store.upload(bucket, object, bytes).await
}

/// Download `bucket/object` and decode it with `format`.
pub async fn download_decoded<T: DeserializeOwned>(
    store: &dyn BlobStore,
    format: PayloadFormat,
    bucket: &str,
    object: &str,
) -> HsResult<T> {
    let bytes = store.download(bucket, object).await?;
    format.decode(&bytes)
}

/// Download the object behind `uri` and decode it with `format`.
pub async fn download_uri_decoded<T: DeserializeOwned>(
    store: &dyn BlobStore,
    format: PayloadFormat,
    uri: &BlobUri,
) -> HsResult<T> {
    let bytes = store.download_uri(uri).await?;
    format.decode(&bytes)
}

/// Process-local blob store. Used by tests and single-machine dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: DashMap<(String, String), Vec<u8>>,
}

impl MemoryBlobStore {
    pub const SCHEME: &'static str = "mem";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Object names currently stored in `bucket`, sorted.
    pub fn object_names(&self, bucket: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == bucket)
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn scheme(&self) -> &str {
        Self::SCHEME
    }

    async fn upload(&self, bucket: &str, object: &str, bytes: Vec<u8>) -> HsResult<BlobUri> {
        self.objects
            .insert((bucket.to_string(), object.to_string()), bytes);
        Ok(self.uri(bucket, object))
    }

    async fn download(&self, bucket: &str, object: &str) -> HsResult<Vec<u8>> {
        self.objects
            .get(&(bucket.to_string(), object.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                TransportError::NotFound {
                    uri: self.uri(bucket, object).to_string(),
                }
                .into()
            })
    }

    async fn exists(&self, uri: &BlobUri) -> HsResult<bool> {
        check_scheme(self.scheme(), uri)?;
        Ok(self
            .objects
            .contains_key(&(uri.bucket.clone(), uri.object.clone())))
    }
}
