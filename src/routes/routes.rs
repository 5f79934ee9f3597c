//! Route table.
//!
//! - **Media API**
//!   - `POST   /api/media/upload`: multipart upload (field `media`)
//!   - `GET    /api/media`: list (`page`, `limit`, `type`, `cursor`)
//!   - `GET    /api/media/{id}`: signed URL (`thumbnail` flag)
//!   - `DELETE /api/media/{id}`: delete original and thumbnail
//!
//! - **Signed downloads** (local backend only)
//!   - `GET    /objects/{*key}`: stream an object given `expires` + `signature`

use crate::handlers::{
    AppState,
    media_handlers::{delete_media, list_media, retrieve_media, upload_media},
    object_handlers::get_signed_object,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the application router with its state attached.
pub fn routes(state: AppState) -> Router {
    let body_limit = usize::try_from(state.media.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let mut router = Router::new()
        .route("/api/media/upload", post(upload_media))
        .route("/api/media", get(list_media))
        .route("/api/media/{id}", get(retrieve_media).delete(delete_media));

    if state.local.is_some() {
        router = router.route("/objects/{*key}", get(get_signed_object));
    }

    router
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
