//! Object store capability consumed by the media pipeline.
//!
//! Every backend implements [`ObjectStore`]; the rest of the crate only ever
//! sees an `Arc<dyn ObjectStore>` built once at startup.

pub mod local;
pub mod memory;
pub mod s3;
pub mod signing;

use async_trait::async_trait;
use bytes::Bytes;
use std::{collections::BTreeMap, io, time::Duration};
use thiserror::Error;

pub use crate::models::object::{ListObjectsPage, ListObjectsParams, ObjectSummary, PutObjectOutput};

/// User-defined metadata attached to an object at write time.
pub type ObjectMetadata = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("public url `{0}` cannot carry object paths")]
    InvalidPublicUrl(String),
    #[error("s3 request failed: {0}")]
    S3(String),
    #[error("could not sign url: {0}")]
    Signing(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket every key of this store lives in.
    fn bucket(&self) -> &str;

    /// Direct (unsigned) location of `key`.
    fn object_url(&self, key: &str) -> String;

    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> StoreResult<PutObjectOutput>;

    async fn get_object(&self, key: &str) -> StoreResult<Bytes>;

    /// Returns `Ok(false)` for a missing key rather than an error.
    async fn head_object(&self, key: &str) -> StoreResult<bool>;

    async fn delete_object(&self, key: &str) -> StoreResult<()>;

    /// One page of keys under `params.prefix`, in lexicographic order.
    async fn list_objects(&self, params: ListObjectsParams) -> StoreResult<ListObjectsPage>;

    /// Time-limited read URL that needs no credentials.
    async fn signed_url(&self, key: &str, ttl: Duration) -> StoreResult<String>;
}

/// Basic key validation shared by the backends that map keys onto paths.
pub(crate) fn ensure_key_safe(key: &str) -> StoreResult<()> {
    const MAX_OBJECT_KEY_LEN: usize = 1024;

    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StoreError::InvalidObjectKey);
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StoreError::InvalidObjectKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StoreError::InvalidObjectKey);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_and_control_keys() {
        assert!(ensure_key_safe("media/images/a.png").is_ok());
        assert!(ensure_key_safe("").is_err());
        assert!(ensure_key_safe("/media/a.png").is_err());
        assert!(ensure_key_safe("media/../etc/passwd").is_err());
        assert!(ensure_key_safe("media/a\nb.png").is_err());
        assert!(ensure_key_safe("media\\a.png").is_err());
    }
}
