//! Data models for the media gateway.
//!
//! `bucket`, `object` and `metadata` mirror rows of the local backend's SQLite
//! catalog; `media` holds the records the pipeline hands back to callers.

pub mod bucket;
pub mod media;
pub mod metadata;
pub mod object;
