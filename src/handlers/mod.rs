//! HTTP handlers. They translate requests into `MediaService` calls and
//! service results into JSON; no pipeline logic lives here.

pub mod media_handlers;
pub mod object_handlers;

use crate::{services::media_service::MediaService, store::local::LocalStore};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub media: MediaService,
    /// Present only with the local backend, which serves its own signed URLs.
    pub local: Option<LocalStore>,
}

impl AppState {
    pub fn new(media: MediaService) -> Self {
        Self { media, local: None }
    }

    pub fn with_local_store(mut self, store: LocalStore) -> Self {
        self.local = Some(store);
        self
    }
}
