//! Records the media pipeline returns to HTTP callers.

use crate::models::object::ObjectSummary;
use crate::services::naming::{MediaCategory, identifier_from_key};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of a successful upload.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub identifier: String,
    pub original_name: String,
    pub mime_type: String,
    pub category: MediaCategory,
    pub size_bytes: u64,
    pub storage_key: String,
    pub bucket: String,
    pub uploaded_at: DateTime<Utc>,
    /// Direct store location of the original, not signed.
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivative_key: Option<String>,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct RetrievedMedia {
    pub identifier: String,
    pub url: String,
    pub key: String,
}

/// One entry of `GET /api/media`.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaListing {
    pub identifier: String,
    pub key: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    /// Retrieval endpoint for this entry on the gateway that listed it.
    pub url: String,
}

impl MediaListing {
    /// `base_url` is `{proto}://{host}` of the listing request.
    pub fn from_summary(summary: ObjectSummary, base_url: &str) -> Self {
        let identifier = identifier_from_key(&summary.key).to_string();
        let url = format!(
            "{}/api/media/{}",
            base_url.trim_end_matches('/'),
            identifier
        );
        Self {
            identifier,
            key: summary.key,
            size_bytes: summary.size_bytes,
            last_modified: summary.last_modified,
            url,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MediaListResponse {
    pub files: Vec<MediaListing>,
    pub count: usize,
    pub page: u32,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_url_points_at_retrieval_endpoint() {
        let summary = ObjectSummary {
            key: "media/images/abc.png".into(),
            size_bytes: 12,
            last_modified: Utc::now(),
        };
        let listing = MediaListing::from_summary(summary, "https://media.example.com/");
        assert_eq!(listing.identifier, "abc");
        assert_eq!(listing.url, "https://media.example.com/api/media/abc");
    }

    #[test]
    fn record_omits_missing_derivative_key() {
        let record = MediaRecord {
            identifier: "abc".into(),
            original_name: "movie.mp4".into(),
            mime_type: "video/mp4".into(),
            category: MediaCategory::Videos,
            size_bytes: 3,
            storage_key: "media/videos/abc.mp4".into(),
            bucket: "media".into(),
            uploaded_at: Utc::now(),
            url: "memory://media/media/videos/abc.mp4".into(),
            derivative_key: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["storageKey"], "media/videos/abc.mp4");
        assert_eq!(json["category"], "videos");
        assert!(json.get("derivativeKey").is_none());
    }
}
