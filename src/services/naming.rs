//! Storage key naming.
//!
//! Every object lives at `media/<category>/<identifier><ext>`. A derivative
//! sits next to its original as `<identifier>_thumb<ext>`, so the pair can be
//! recovered from either key by string manipulation alone.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

pub const MEDIA_PREFIX: &str = "media/";
pub const DERIVATIVE_MARKER: &str = "_thumb";

const THUMBNAIL_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Images,
    Videos,
    Files,
}

impl MediaCategory {
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Images
        } else if mime.starts_with("video/") {
            Self::Videos
        } else {
            Self::Files
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Images => "images",
            Self::Videos => "videos",
            Self::Files => "files",
        }
    }

    /// `media/<category>/`
    pub fn prefix(self) -> String {
        format!("{MEDIA_PREFIX}{}/", self.as_str())
    }
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl fmt::Display for UnknownCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown media type `{}` (expected images, videos or files)",
            self.0
        )
    }
}

impl FromStr for MediaCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "images" => Ok(Self::Images),
            "videos" => Ok(Self::Videos),
            "files" => Ok(Self::Files),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// Identifier and storage key assigned to a new upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaKey {
    pub identifier: String,
    pub storage_key: String,
    pub category: MediaCategory,
}

/// Assign a fresh random identifier and the key it will be stored under.
pub fn derive_key(filename: &str, mime: &str) -> MediaKey {
    derive_key_with(Uuid::new_v4(), filename, mime)
}

pub fn derive_key_with(identifier: Uuid, filename: &str, mime: &str) -> MediaKey {
    let category = MediaCategory::from_mime(mime);
    let identifier = identifier.to_string();
    let storage_key = format!(
        "{}{}{}",
        category.prefix(),
        identifier,
        extension(filename)
    );
    MediaKey {
        identifier,
        storage_key,
        category,
    }
}

/// Extension of the last path segment, leading dot included.
///
/// Dotfiles such as `.env` have no extension; `archive.` has `"."`.
pub fn extension(filename: &str) -> &str {
    let base = basename(filename);
    match base.rfind('.') {
        Some(0) | None => "",
        Some(idx) => &base[idx..],
    }
}

fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
}

/// `media/images/<id>.png` -> `media/images/<id>_thumb.png`.
///
/// `None` when the key has no extension to anchor the suffix on.
pub fn derivative_key(storage_key: &str) -> Option<String> {
    let ext = extension(storage_key);
    if ext.len() < 2 {
        return None;
    }
    let stem = &storage_key[..storage_key.len() - ext.len()];
    Some(format!("{stem}{DERIVATIVE_MARKER}{ext}"))
}

/// The marker only counts right before the final extension.
pub fn is_derivative_key(key: &str) -> bool {
    !extension(key).is_empty() && identifier_from_key(key).ends_with(DERIVATIVE_MARKER)
}

/// Directory placeholder objects created by some S3 clients.
pub fn is_placeholder_key(key: &str) -> bool {
    key.ends_with('/')
}

/// File stem of the last segment: `media/images/<id>.png` -> `<id>`.
pub fn identifier_from_key(key: &str) -> &str {
    let base = basename(key);
    let ext = extension(base);
    &base[..base.len() - ext.len()]
}

/// Whether a thumbnail may be served in place of `key`.
pub fn has_thumbnail_extension(key: &str) -> bool {
    let ext = extension(key).trim_start_matches('.');
    THUMBNAIL_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}
