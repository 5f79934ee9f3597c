//! The media lifecycle: ingest, resolve, retrieve, list and delete.
//!
//! `MediaService` owns no storage of its own. Everything durable lives in the
//! injected [`ObjectStore`]; the [`MediaIndex`] only short-circuits lookups.
//! Derivative work is advisory: its outcome is returned next to the main
//! result and never turns a successful operation into a failure.

use crate::{
    models::media::{MediaRecord, RetrievedMedia},
    services::{
        derivative::{self, Derivative, DerivativeError},
        media_index::{IndexEntry, MediaIndex},
        naming::{
            self, MEDIA_PREFIX, MediaCategory, MediaKey, derivative_key, has_thumbnail_extension,
            identifier_from_key, is_derivative_key, is_placeholder_key,
        },
    },
    store::{ListObjectsParams, ObjectMetadata, ObjectStore, ObjectSummary, StoreError},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 1000;
pub const ANONYMOUS_UPLOADER: &str = "anonymous";

const SCAN_PAGE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("No file uploaded")]
    MissingFile,
    #[error("Only image and video files are allowed (got `{0}`)")]
    UnsupportedMediaType(String),
    #[error("File exceeds the upload limit of {limit} bytes")]
    PayloadTooLarge { limit: u64 },
    #[error("{0}")]
    InvalidQuery(String),
    #[error("Media file not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<naming::UnknownCategory> for MediaError {
    fn from(err: naming::UnknownCategory) -> Self {
        MediaError::InvalidQuery(err.to_string())
    }
}

/// An upload as it arrives from the transport.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Multipart field the file came in on.
    pub field_name: String,
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
    pub uploaded_by: Option<String>,
}

#[derive(Debug)]
pub struct IngestOutcome {
    pub record: MediaRecord,
    /// `None` for non-image uploads.
    pub derivative: Option<Result<Derivative, DerivativeError>>,
}

#[derive(Debug)]
pub struct MediaPage {
    pub entries: Vec<ObjectSummary>,
    pub next_cursor: Option<String>,
}

#[derive(Debug)]
pub struct DeletedMedia {
    pub storage_key: String,
    /// Outcome of removing the derivative, when there was one to remove.
    pub derivative: Option<Result<String, StoreError>>,
}

/// Reject anything that is not an image or a video.
pub fn check_media_type(mime: &str) -> Result<(), MediaError> {
    if mime.starts_with("image/") || mime.starts_with("video/") {
        Ok(())
    } else {
        Err(MediaError::UnsupportedMediaType(mime.to_string()))
    }
}

pub fn encode_cursor(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key)
}

pub fn decode_cursor(cursor: &str) -> Result<String, MediaError> {
    URL_SAFE_NO_PAD
        .decode(cursor)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| MediaError::InvalidQuery("invalid cursor".into()))
}

#[derive(Clone)]
pub struct MediaService {
    store: Arc<dyn ObjectStore>,
    index: MediaIndex,
    max_upload_bytes: u64,
    signed_url_ttl: Duration,
    scan_page_size: usize,
}

impl MediaService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            index: MediaIndex::new(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            signed_url_ttl: DEFAULT_SIGNED_URL_TTL,
            scan_page_size: SCAN_PAGE_SIZE,
        }
    }

    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    pub fn with_signed_url_ttl(mut self, ttl: Duration) -> Self {
        self.signed_url_ttl = ttl;
        self
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn index(&self) -> &MediaIndex {
        &self.index
    }

    pub fn check_size(&self, size: u64) -> Result<(), MediaError> {
        if size > self.max_upload_bytes {
            Err(MediaError::PayloadTooLarge {
                limit: self.max_upload_bytes,
            })
        } else {
            Ok(())
        }
    }

    /// Validate, store the original and, for images, attach a thumbnail.
    ///
    /// Nothing is written unless validation passes. Once the original is
    /// stored the call succeeds regardless of what happens to the thumbnail.
    #[instrument(
        skip(self, upload),
        fields(filename = %upload.filename, mime = %upload.content_type, size = upload.data.len())
    )]
    pub async fn ingest(&self, upload: Upload) -> Result<IngestOutcome, MediaError> {
        check_media_type(&upload.content_type)?;
        self.check_size(upload.data.len() as u64)?;

        let MediaKey {
            identifier,
            storage_key,
            category,
        } = naming::derive_key(&upload.filename, &upload.content_type);

        let uploaded_at = Utc::now();
        let mut metadata = ObjectMetadata::new();
        metadata.insert("fieldName".into(), upload.field_name.clone());
        metadata.insert(
            "uploadedBy".into(),
            upload
                .uploaded_by
                .clone()
                .unwrap_or_else(|| ANONYMOUS_UPLOADER.into()),
        );
        metadata.insert(
            "uploadedAt".into(),
            uploaded_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        );

        let stored = self
            .store
            .put_object(
                &storage_key,
                upload.data.clone(),
                &upload.content_type,
                &metadata,
            )
            .await?;

        let mut record = MediaRecord {
            identifier: identifier.clone(),
            original_name: upload.filename,
            mime_type: upload.content_type,
            category,
            size_bytes: stored.size,
            storage_key: storage_key.clone(),
            bucket: self.store.bucket().to_string(),
            uploaded_at,
            url: stored.url,
            derivative_key: None,
        };

        let derivative = if category == MediaCategory::Images {
            let outcome =
                derivative::generate(self.store.as_ref(), &storage_key, upload.data).await;
            match &outcome {
                Ok(stored) => record.derivative_key = Some(stored.key.clone()),
                Err(err) => warn!(key = %storage_key, error = %err, "thumbnail generation failed"),
            }
            Some(outcome)
        } else {
            None
        };

        let has_derivative = matches!(derivative, Some(Ok(_)));
        self.index
            .insert(
                identifier.clone(),
                IndexEntry::new(storage_key.clone(), Some(has_derivative)),
            )
            .await;

        let indexed = self.index.len().await;
        info!(
            identifier = %identifier,
            key = %storage_key,
            has_derivative,
            indexed,
            "media ingested"
        );
        Ok(IngestOutcome { record, derivative })
    }

    /// Map an identifier to the entry of its original.
    ///
    /// An index hit is confirmed against the store; a stale entry is evicted
    /// and resolution falls back to scanning `media/`. The first
    /// non-derivative key containing the identifier wins, in store listing
    /// order.
    pub async fn resolve(&self, identifier: &str) -> Result<IndexEntry, MediaError> {
        if identifier.is_empty() {
            return Err(MediaError::NotFound);
        }
        if let Some(entry) = self.index.get(identifier).await {
            if self.store.head_object(&entry.storage_key).await? {
                return Ok(entry);
            }
            debug!(identifier, key = %entry.storage_key, "evicting stale index entry");
            self.evict(identifier, &entry.storage_key).await;
        }

        let key = self
            .scan_for(identifier)
            .await?
            .ok_or(MediaError::NotFound)?;
        debug!(identifier, key = %key, "resolved by scan");

        // Partial identifiers stay uncached; a later upload could change the answer.
        if identifier_from_key(&key) == identifier {
            self.index.remember(identifier, &key).await;
        }
        Ok(IndexEntry::new(key, None))
    }

    async fn evict(&self, identifier: &str, storage_key: &str) {
        self.index.remove(identifier).await;
        self.index.remove(identifier_from_key(storage_key)).await;
    }

    async fn scan_for(&self, identifier: &str) -> Result<Option<String>, StoreError> {
        let mut start_after = None;
        loop {
            let params = ListObjectsParams::new(MEDIA_PREFIX, self.scan_page_size)
                .start_after(start_after.take());
            let page = self.store.list_objects(params).await?;

            let hit = page.objects.iter().find(|obj| {
                !is_placeholder_key(&obj.key)
                    && !is_derivative_key(&obj.key)
                    && obj.key.contains(identifier)
            });
            if let Some(obj) = hit {
                return Ok(Some(obj.key.clone()));
            }

            match page.objects.last() {
                Some(last) if page.is_truncated => start_after = Some(last.key.clone()),
                _ => return Ok(None),
            }
        }
    }

    /// Signed URL for an identifier, preferring the thumbnail when asked.
    #[instrument(skip(self))]
    pub async fn retrieve(
        &self,
        identifier: &str,
        thumbnail: bool,
    ) -> Result<RetrievedMedia, MediaError> {
        let entry = self.resolve(identifier).await?;
        let key = if thumbnail {
            self.thumbnail_or_original(identifier, &entry).await
        } else {
            entry.storage_key
        };

        let url = self.store.signed_url(&key, self.signed_url_ttl).await?;
        Ok(RetrievedMedia {
            identifier: identifier.to_string(),
            url,
            key,
        })
    }

    async fn thumbnail_or_original(&self, identifier: &str, entry: &IndexEntry) -> String {
        let original = entry.storage_key.clone();
        if !has_thumbnail_extension(&original) {
            return original;
        }
        let Some(candidate) = derivative_key(&original) else {
            return original;
        };

        // A known absence is final; a known presence may have gone stale.
        if entry.has_derivative == Some(false) {
            return original;
        }
        let present = match self.store.head_object(&candidate).await {
            Ok(present) => {
                self.index.mark_derivative(identifier, present).await;
                present
            }
            Err(err) => {
                debug!(key = %candidate, error = %err, "thumbnail probe failed");
                false
            }
        };

        if present { candidate } else { original }
    }

    /// One page of originals, optionally restricted to a category.
    ///
    /// `cursor` is the `next_cursor` of a previous page.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        category: Option<MediaCategory>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<MediaPage, MediaError> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let prefix = category
            .map(MediaCategory::prefix)
            .unwrap_or_else(|| MEDIA_PREFIX.to_string());
        let mut start_after = cursor.map(decode_cursor).transpose()?;

        let mut entries = Vec::with_capacity(limit);
        let mut last_consumed: Option<String> = None;
        let mut more = false;

        'pages: loop {
            let params =
                ListObjectsParams::new(prefix.clone(), limit).start_after(start_after.take());
            let page = self.store.list_objects(params).await?;
            let count = page.objects.len();

            for (position, obj) in page.objects.into_iter().enumerate() {
                last_consumed = Some(obj.key.clone());
                if !is_placeholder_key(&obj.key) && !is_derivative_key(&obj.key) {
                    entries.push(obj);
                }
                if entries.len() == limit {
                    more = position + 1 < count || page.is_truncated;
                    break 'pages;
                }
            }

            if !page.is_truncated || count == 0 {
                break;
            }
            start_after = last_consumed.clone();
        }

        let next_cursor = if more {
            last_consumed.as_deref().map(encode_cursor)
        } else {
            None
        };
        Ok(MediaPage {
            entries,
            next_cursor,
        })
    }

    /// Delete the original, then make a best-effort pass at its thumbnail.
    #[instrument(skip(self))]
    pub async fn delete(&self, identifier: &str) -> Result<DeletedMedia, MediaError> {
        let entry = self.resolve(identifier).await?;
        let storage_key = entry.storage_key;

        match self.store.delete_object(&storage_key).await {
            Ok(()) => {}
            Err(StoreError::ObjectNotFound { .. }) => {
                // Removed between the existence check and the delete.
                self.evict(identifier, &storage_key).await;
                return Err(MediaError::NotFound);
            }
            Err(err) => return Err(err.into()),
        }

        let derivative = match derivative_key(&storage_key) {
            Some(key) if entry.has_derivative != Some(false) => {
                let outcome = self.store.delete_object(&key).await.map(|()| key);
                match &outcome {
                    Ok(key) => debug!(key = %key, "thumbnail deleted"),
                    Err(StoreError::ObjectNotFound { key, .. }) => {
                        debug!(key = %key, "no thumbnail to delete")
                    }
                    Err(err) => warn!(key = %storage_key, error = %err, "thumbnail delete failed"),
                }
                Some(outcome)
            }
            _ => None,
        };

        self.evict(identifier, &storage_key).await;

        info!(identifier, key = %storage_key, "media deleted");
        Ok(DeletedMedia {
            storage_key,
            derivative,
        })
    }
}
