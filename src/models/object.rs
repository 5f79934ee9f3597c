//! Objects as the store sees them: catalog rows, listing entries and the
//! parameters used to page through them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single object (blob) row in the local catalog.
///
/// Holds metadata only; the payload lives on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the payload.
    pub etag: Option<String>,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,
}

/// Listing entry common to every backend.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

impl From<Object> for ObjectSummary {
    fn from(obj: Object) -> Self {
        Self {
            key: obj.key,
            size_bytes: obj.size_bytes.max(0) as u64,
            last_modified: obj.last_modified,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ListObjectsParams {
    pub prefix: String,
    /// Only keys strictly greater than this one are returned.
    pub start_after: Option<String>,
    pub max_keys: usize,
}

impl ListObjectsParams {
    pub fn new(prefix: impl Into<String>, max_keys: usize) -> Self {
        Self {
            prefix: prefix.into(),
            start_after: None,
            max_keys,
        }
    }

    pub fn start_after(mut self, key: Option<String>) -> Self {
        self.start_after = key;
        self
    }
}

#[derive(Debug, Default)]
pub struct ListObjectsPage {
    pub objects: Vec<ObjectSummary>,
    pub is_truncated: bool,
}

/// Result of writing an object.
#[derive(Debug, Clone)]
pub struct PutObjectOutput {
    /// Direct location of the stored object (not signed).
    pub url: String,
    pub etag: String,
    pub size: u64,
}
