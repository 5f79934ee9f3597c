//! Process-local object store for development and tests.

use super::{ObjectMetadata, ObjectStore, StoreError, StoreResult, ensure_key_safe};
use crate::models::object::{ListObjectsPage, ListObjectsParams, ObjectSummary, PutObjectOutput};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
    pub metadata: ObjectMetadata,
    pub last_modified: DateTime<Utc>,
}

/// `BTreeMap`-backed store. Keys iterate in the same lexicographic order an
/// S3 listing uses.
#[derive(Clone)]
pub struct MemoryStore {
    bucket: String,
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    /// Successful puts and deletes.
    mutations: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Arc::default(),
            mutations: Arc::default(),
        }
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn not_found(&self, key: &str) -> StoreError {
        StoreError::ObjectNotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_url(&self, key: &str) -> String {
        format!("memory://{}/{}", self.bucket, key)
    }

    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> StoreResult<PutObjectOutput> {
        ensure_key_safe(key)?;
        let size = data.len() as u64;
        let etag = format!("{:x}", md5::compute(&data));
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                StoredObject {
                    data,
                    content_type: content_type.to_string(),
                    metadata: metadata.clone(),
                    last_modified: Utc::now(),
                },
            );
        self.mutations.fetch_add(1, Ordering::SeqCst);

        Ok(PutObjectOutput {
            url: self.object_url(key),
            etag,
            size,
        })
    }

    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        self.object(key)
            .map(|obj| obj.data)
            .ok_or_else(|| self.not_found(key))
    }

    async fn head_object(&self, key: &str) -> StoreResult<bool> {
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key))
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        let removed = self
            .objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        match removed {
            Some(_) => {
                self.mutations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(self.not_found(key)),
        }
    }

    async fn list_objects(&self, params: ListObjectsParams) -> StoreResult<ListObjectsPage> {
        let max_keys = params.max_keys.max(1);
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);

        let lower = match &params.start_after {
            Some(after) => Bound::Excluded(after.clone()),
            None => Bound::Included(params.prefix.clone()),
        };
        let mut matching = objects
            .range((lower, Bound::Unbounded))
            .skip_while(|(key, _)| key.as_str() < params.prefix.as_str())
            .take_while(|(key, _)| key.starts_with(&params.prefix))
            .map(|(key, obj)| ObjectSummary {
                key: key.clone(),
                size_bytes: obj.data.len() as u64,
                last_modified: obj.last_modified,
            });

        let page: Vec<_> = matching.by_ref().take(max_keys).collect();
        let is_truncated = matching.next().is_some();
        Ok(ListObjectsPage {
            objects: page,
            is_truncated,
        })
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!("{}?expires={}", self.object_url(key), expires_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded(keys: &[&str]) -> MemoryStore {
        let store = MemoryStore::new("media");
        for key in keys {
            store
                .put_object(key, Bytes::from_static(b"x"), "image/png", &ObjectMetadata::new())
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn listing_honours_prefix_start_after_and_limit() {
        let store = seeded(&[
            "media/images/a.png",
            "media/images/b.png",
            "media/images/c.png",
            "media/videos/d.mp4",
            "other/e.png",
        ])
        .await;

        let page = store
            .list_objects(ListObjectsParams::new("media/images/", 2))
            .await
            .unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["media/images/a.png", "media/images/b.png"]);
        assert!(page.is_truncated);

        let page = store
            .list_objects(
                ListObjectsParams::new("media/", 10).start_after(Some("media/images/b.png".into())),
            )
            .await
            .unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["media/images/c.png", "media/videos/d.mp4"]);
        assert!(!page.is_truncated);
    }

    #[tokio::test]
    async fn start_after_before_prefix_still_starts_at_prefix() {
        let store = seeded(&["a/x", "media/images/a.png"]).await;
        let page = store
            .list_objects(ListObjectsParams::new("media/", 10).start_after(Some("a".into())))
            .await
            .unwrap();
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, "media/images/a.png");
    }

    #[tokio::test]
    async fn mutations_are_counted() {
        let store = seeded(&["media/images/a.png"]).await;
        assert_eq!(store.mutation_count(), 1);
        store.delete_object("media/images/a.png").await.unwrap();
        assert_eq!(store.mutation_count(), 2);
        assert!(store.delete_object("media/images/a.png").await.is_err());
        assert_eq!(store.mutation_count(), 2);
        assert!(!store.head_object("media/images/a.png").await.unwrap());
    }
}
