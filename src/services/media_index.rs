//! In-process identifier index.
//!
//! Maps an identifier straight to its storage key so lookups skip the prefix
//! scan. Entries are lost on restart; a miss always falls back to scanning
//! the store.

use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub storage_key: String,
    /// `None` when the entry was learned from a scan and nobody has checked.
    pub has_derivative: Option<bool>,
}

impl IndexEntry {
    pub fn new(storage_key: impl Into<String>, has_derivative: Option<bool>) -> Self {
        Self {
            storage_key: storage_key.into(),
            has_derivative,
        }
    }
}

#[derive(Clone, Default)]
pub struct MediaIndex {
    entries: Arc<RwLock<HashMap<String, IndexEntry>>>,
}

impl MediaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, identifier: &str) -> Option<IndexEntry> {
        self.entries.read().await.get(identifier).cloned()
    }

    pub async fn insert(&self, identifier: impl Into<String>, entry: IndexEntry) {
        self.entries.write().await.insert(identifier.into(), entry);
    }

    /// Record a scan hit without clobbering what ingest already knows.
    pub async fn remember(&self, identifier: &str, storage_key: &str) {
        self.entries
            .write()
            .await
            .entry(identifier.to_string())
            .or_insert_with(|| IndexEntry::new(storage_key, None));
    }

    /// Store the result of a derivative probe on an existing entry.
    pub async fn mark_derivative(&self, identifier: &str, present: bool) {
        if let Some(entry) = self.entries.write().await.get_mut(identifier) {
            entry.has_derivative = Some(present);
        }
    }

    pub async fn remove(&self, identifier: &str) -> Option<IndexEntry> {
        self.entries.write().await.remove(identifier)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_get_remove() {
        let index = MediaIndex::new();
        assert_eq!(index.len().await, 0);

        index
            .insert("abc", IndexEntry::new("media/images/abc.png", Some(true)))
            .await;
        assert_eq!(
            index.get("abc").await,
            Some(IndexEntry::new("media/images/abc.png", Some(true)))
        );
        assert_eq!(index.len().await, 1);

        assert!(index.remove("abc").await.is_some());
        assert_eq!(index.get("abc").await, None);
        assert!(index.remove("abc").await.is_none());
    }

    #[tokio::test]
    async fn remember_keeps_known_derivative_state() {
        let index = MediaIndex::new();
        index
            .insert("abc", IndexEntry::new("media/images/abc.png", Some(false)))
            .await;
        index.remember("abc", "media/images/abc.png").await;
        assert_eq!(index.get("abc").await.unwrap().has_derivative, Some(false));

        index.remember("def", "media/videos/def.mp4").await;
        assert_eq!(index.get("def").await.unwrap().has_derivative, None);

        index.mark_derivative("def", true).await;
        assert_eq!(index.get("def").await.unwrap().has_derivative, Some(true));
        index.mark_derivative("missing", true).await;
        assert_eq!(index.get("missing").await, None);
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let index = MediaIndex::new();
        let other = index.clone();
        index
            .insert("abc", IndexEntry::new("media/files/abc", Some(false)))
            .await;
        assert!(other.get("abc").await.is_some());
    }
}
