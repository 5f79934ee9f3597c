//! Local backend.
//!
//! An S3-like object store backed by SQLite for object metadata
//! and local disk for payloads sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`. Signed URLs point back at the
//! gateway's `/objects/{key}` route and are checked with [`UrlSigner`].

use super::{
    ObjectMetadata, ObjectStore, StoreError, StoreResult, ensure_key_safe,
    signing::{SignatureError, UrlSigner},
};
use crate::models::{
    bucket::Bucket,
    object::{ListObjectsPage, ListObjectsParams, Object, ObjectSummary, PutObjectOutput},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use md5::Context;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use url::Url;
use uuid::Uuid;

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const MAX_LIST_KEYS: usize = 1000;
const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Disk + SQLite implementation of [`ObjectStore`] for a single bucket.
#[derive(Clone)]
pub struct LocalStore {
    /// Shared SQLite connection pool used for metadata operations.
    db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    base_path: PathBuf,

    bucket: Bucket,
    signer: UrlSigner,

    /// Externally reachable root of this gateway, used for object URLs.
    public_base_url: Url,
}

impl LocalStore {
    /// Create the catalog tables if they are missing.
    ///
    /// Statements are split on `;` and executed one by one.
    pub async fn migrate(db: &SqlitePool) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(db).await?;
        }
        Ok(())
    }

    /// Open the store for `bucket`, creating the bucket row and directory on
    /// first use. The schema must already exist (see [`LocalStore::migrate`]).
    pub async fn open(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        bucket: &str,
        signer: UrlSigner,
        public_base_url: Url,
    ) -> StoreResult<Self> {
        ensure_bucket_name_safe(bucket)?;
        if public_base_url.cannot_be_a_base() {
            return Err(StoreError::InvalidPublicUrl(public_base_url.to_string()));
        }

        sqlx::query(
            "INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(bucket)
        .bind(Utc::now())
        .execute(&*db)
        .await?;

        let bucket = sqlx::query_as::<_, Bucket>(
            "SELECT id, name, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*db)
        .await?;

        let store = Self {
            db,
            base_path: base_path.into(),
            bucket,
            signer,
            public_base_url,
        };
        fs::create_dir_all(store.bucket_root()).await?;
        Ok(store)
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket.name)
    }

    /// Two-level shard directories from MD5(bucket/key), `00`–`ff` each.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// `base_path/bucket/{shard}/{shard}/{key}`. Parent directories may not
    /// exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket.name, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Gateway URL for `key`, without query parameters.
    fn location(&self, key: &str) -> StoreResult<Url> {
        let mut url = self.public_base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidPublicUrl(self.public_base_url.to_string()))?
            .pop_if_empty()
            .push("objects")
            .extend(key.split('/'));
        Ok(url)
    }

    async fn fetch_object(&self, key: &str) -> StoreResult<Object> {
        sqlx::query_as::<_, Object>(
            "SELECT id, bucket_id, key, content_type, size_bytes, etag, last_modified
             FROM objects
             WHERE key = ? AND bucket_id = ?",
        )
        .bind(key)
        .bind(self.bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::ObjectNotFound {
                bucket: self.bucket.name.clone(),
                key: key.to_string(),
            },
            other => StoreError::Sqlx(other),
        })
    }

    /// Write `data` to a temp file next to `file_path`, fsync, then rename it
    /// into place. Returns the MD5 etag.
    async fn write_payload(&self, file_path: &Path, data: &[u8]) -> StoreResult<String> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let mut digest = Context::new();
        digest.consume(data);

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        Ok(format!("{:x}", digest.compute()))
    }

    /// Upsert the catalog row for `key` and replace its metadata entries.
    async fn record_object(
        &self,
        key: &str,
        content_type: &str,
        size_bytes: i64,
        etag: &str,
        metadata: &ObjectMetadata,
    ) -> StoreResult<Object> {
        let mut tx = self.db.begin().await?;

        let object = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, bucket_id, key, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(self.bucket.id)
        .bind(key)
        .bind(content_type)
        .bind(size_bytes)
        .bind(etag)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        for (name, value) in metadata {
            sqlx::query(
                "INSERT INTO object_metadata (id, object_id, key, value) VALUES (?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(object.id)
            .bind(name)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(object)
    }

    /// Metadata entries stored with `key`.
    pub async fn object_metadata(&self, key: &str) -> StoreResult<ObjectMetadata> {
        let object = self.fetch_object(key).await?;
        let rows = sqlx::query_as::<_, crate::models::metadata::MetadataEntry>(
            "SELECT id, object_id, key, value FROM object_metadata WHERE object_id = ?",
        )
        .bind(object.id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(|row| (row.key, row.value)).collect())
    }

    /// Catalog row plus an open file handle, ready for streaming out.
    ///
    /// Returns ObjectNotFound if the row exists but the payload is missing.
    pub async fn open_reader(&self, key: &str) -> StoreResult<(Object, File)> {
        ensure_key_safe(key)?;
        let object = self.fetch_object(key).await?;
        let file = File::open(self.object_path(key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StoreError::ObjectNotFound {
                        bucket: self.bucket.name.clone(),
                        key: key.to_string(),
                    }
                } else {
                    StoreError::Io(err)
                }
            })?;
        Ok((object, file))
    }

    /// Check a signature issued by [`ObjectStore::signed_url`].
    pub fn verify_signature(
        &self,
        key: &str,
        expires_at: i64,
        signature: &str,
    ) -> Result<(), SignatureError> {
        self.signer
            .verify(key, expires_at, signature, Utc::now().timestamp())
    }

    /// Remove empty directories from `start` up to (not including) the bucket
    /// root. Stops at the first non-empty or missing directory.
    async fn prune_empty_dirs(&self, start: &Path) {
        let stop = self.bucket_root();
        let mut current = start.to_path_buf();
        while current.starts_with(&stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn bucket(&self) -> &str {
        &self.bucket.name
    }

    fn object_url(&self, key: &str) -> String {
        match self.location(key) {
            Ok(url) => url.to_string(),
            Err(_) => format!(
                "{}/objects/{}",
                self.public_base_url.as_str().trim_end_matches('/'),
                key
            ),
        }
    }

    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> StoreResult<PutObjectOutput> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let size = data.len() as u64;
        let etag = self.write_payload(&file_path, &data).await?;

        if let Err(err) = self
            .record_object(key, content_type, size as i64, &etag, metadata)
            .await
        {
            let _ = fs::remove_file(&file_path).await;
            return Err(err);
        }

        debug!(key = %key, size, "stored object on disk");
        Ok(PutObjectOutput {
            url: self.object_url(key),
            etag,
            size,
        })
    }

    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        ensure_key_safe(key)?;
        self.fetch_object(key).await?;
        match fs::read(self.object_path(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::ObjectNotFound {
                bucket: self.bucket.name.clone(),
                key: key.to_string(),
            }),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn head_object(&self, key: &str) -> StoreResult<bool> {
        ensure_key_safe(key)?;
        match self.fetch_object(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::ObjectNotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Delete the catalog row (metadata cascades) and the payload, then prune
    /// empty shard directories.
    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let object = self.fetch_object(key).await?;

        sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(object.id)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn list_objects(&self, params: ListObjectsParams) -> StoreResult<ListObjectsPage> {
        let max_keys = params.max_keys.clamp(1, MAX_LIST_KEYS);
        let fetch_limit = max_keys + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, bucket_id, key, content_type, size_bytes, etag, last_modified \
             FROM objects WHERE bucket_id = ",
        );
        builder.push_bind(self.bucket.id);

        // substr keeps the prefix match exact; LIKE would be case-insensitive.
        if !params.prefix.is_empty() {
            builder.push(" AND substr(key, 1, ");
            builder.push_bind(params.prefix.chars().count() as i64);
            builder.push(") = ");
            builder.push_bind(params.prefix.clone());
        }

        if let Some(after) = &params.start_after {
            builder.push(" AND key > ");
            builder.push_bind(after.clone());
        }

        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<Object> = builder.build_query_as().fetch_all(&*self.db).await?;

        let is_truncated = rows.len() == fetch_limit;
        if is_truncated {
            rows.pop();
        }

        Ok(ListObjectsPage {
            objects: rows.into_iter().map(ObjectSummary::from).collect(),
            is_truncated,
        })
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        ensure_key_safe(key)?;
        let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = self
            .signer
            .sign(key, expires_at)
            .map_err(|err| StoreError::Signing(err.to_string()))?;

        let mut url = self.location(key)?;
        url.query_pairs_mut()
            .append_pair("expires", &expires_at.to_string())
            .append_pair("signature", &signature);
        Ok(url.to_string())
    }
}

/// Enforce S3-like bucket naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
fn ensure_bucket_name_safe(name: &str) -> StoreResult<()> {
    let invalid = |reason: &str| StoreError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }
    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }
    Ok(())
}

/// Names like `1.2.3.4`.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn store() -> (LocalStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        LocalStore::migrate(&db).await.unwrap();
        let store = LocalStore::open(
            Arc::new(db),
            dir.path(),
            "media-test",
            UrlSigner::new("test-secret"),
            Url::parse("http://localhost:3000").unwrap(),
        )
        .await
        .unwrap();
        (store, dir)
    }

    fn meta(pairs: &[(&str, &str)]) -> ObjectMetadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn put_get_head_delete_cycle() {
        let (store, _dir) = store().await;
        let key = "media/images/abc.png";

        let out = store
            .put_object(
                key,
                Bytes::from_static(b"png-bytes"),
                "image/png",
                &meta(&[("uploadedBy", "u1")]),
            )
            .await
            .unwrap();
        assert_eq!(out.size, 9);
        assert_eq!(out.etag, format!("{:x}", md5::compute(b"png-bytes")));
        assert_eq!(out.url, "http://localhost:3000/objects/media/images/abc.png");

        assert!(store.head_object(key).await.unwrap());
        assert_eq!(
            store.get_object(key).await.unwrap(),
            Bytes::from_static(b"png-bytes")
        );
        let stored = store.object_metadata(key).await.unwrap();
        assert_eq!(stored.get("uploadedBy").map(String::as_str), Some("u1"));

        store.delete_object(key).await.unwrap();
        assert!(!store.head_object(key).await.unwrap());
        assert!(matches!(
            store.delete_object(key).await,
            Err(StoreError::ObjectNotFound { .. })
        ));
        assert!(!store.object_path(key).exists());
    }

    #[tokio::test]
    async fn overwrite_replaces_payload_and_metadata() {
        let (store, _dir) = store().await;
        let key = "media/videos/clip.mp4";
        store
            .put_object(key, Bytes::from_static(b"one"), "video/mp4", &meta(&[("a", "1")]))
            .await
            .unwrap();
        store
            .put_object(key, Bytes::from_static(b"two!"), "video/mp4", &meta(&[("b", "2")]))
            .await
            .unwrap();

        assert_eq!(store.get_object(key).await.unwrap(), Bytes::from_static(b"two!"));
        let stored = store.object_metadata(key).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored.get("b").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn listing_is_prefix_exact_ordered_and_paged() {
        let (store, _dir) = store().await;
        for key in [
            "media/images/b.png",
            "media/images/a.png",
            "media/images/a_thumb.png",
            "media/videos/c.mp4",
            "MEDIA/images/upper.png",
        ] {
            store
                .put_object(
                    key,
                    Bytes::from_static(b"x"),
                    "application/octet-stream",
                    &ObjectMetadata::new(),
                )
                .await
                .unwrap();
        }

        let page = store
            .list_objects(ListObjectsParams::new("media/images/", 2))
            .await
            .unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["media/images/a.png", "media/images/a_thumb.png"]);
        assert!(page.is_truncated);

        let rest = store
            .list_objects(
                ListObjectsParams::new("media/images/", 2)
                    .start_after(Some("media/images/a_thumb.png".into())),
            )
            .await
            .unwrap();
        let keys: Vec<_> = rest.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["media/images/b.png"]);
        assert!(!rest.is_truncated);
    }

    #[tokio::test]
    async fn signed_url_verifies_against_store_signer() {
        let (store, _dir) = store().await;
        let key = "media/images/abc.png";
        let signed = Url::parse(
            &store
                .signed_url(key, Duration::from_secs(3600))
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(signed.path(), "/objects/media/images/abc.png");

        let query: std::collections::HashMap<_, _> = signed.query_pairs().into_owned().collect();
        let expires: i64 = query["expires"].parse().unwrap();
        assert!(expires > Utc::now().timestamp());
        assert_eq!(store.verify_signature(key, expires, &query["signature"]), Ok(()));
        assert_eq!(
            store.verify_signature("media/images/other.png", expires, &query["signature"]),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn bucket_names_follow_s3_rules() {
        assert!(ensure_bucket_name_safe("media").is_ok());
        assert!(ensure_bucket_name_safe("my.media-bucket").is_ok());
        assert!(ensure_bucket_name_safe("ab").is_err());
        assert!(ensure_bucket_name_safe("Media").is_err());
        assert!(ensure_bucket_name_safe("-media").is_err());
        assert!(ensure_bucket_name_safe("me..dia").is_err());
        assert!(ensure_bucket_name_safe("192.168.1.1").is_err());
    }
}
