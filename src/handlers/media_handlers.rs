//! `/api/media` handlers: upload, list, retrieve and delete.

use super::AppState;
use crate::{
    errors::AppError,
    models::media::{MediaListResponse, MediaListing, MediaRecord, RetrievedMedia},
    services::{
        media_service::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT, MediaError, Upload, check_media_type},
        naming::MediaCategory,
    },
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Multipart field carrying the file.
pub const UPLOAD_FIELD: &str = "media";
/// Set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";
const FORWARDED_PROTO_HEADER: &str = "x-forwarded-proto";

#[derive(Serialize)]
pub struct UploadResponse {
    pub message: &'static str,
    pub media: MediaRecord,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ListMediaQuery {
    pub page: Option<u32>,
    pub limit: Option<usize>,
    #[serde(rename = "type")]
    pub category: Option<String>,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RetrieveQuery {
    pub thumbnail: Option<String>,
}

impl RetrieveQuery {
    /// Any value other than `false`, `0` or empty asks for the thumbnail.
    pub fn wants_thumbnail(&self) -> bool {
        self.thumbnail
            .as_deref()
            .is_some_and(|value| !matches!(value.trim(), "" | "0" | "false"))
    }
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// `{proto}://{host}` of the request, as the client addressed it.
fn request_base_url(headers: &HeaderMap) -> String {
    let proto = header_str(headers, FORWARDED_PROTO_HEADER)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .unwrap_or("http");
    let host = header_str(headers, header::HOST.as_str()).unwrap_or("localhost");
    format!("{proto}://{host}")
}

/// POST `/api/media/upload`: multipart form with a single `media` file field.
///
/// The MIME type is checked before any byte is read and the size limit is
/// enforced chunk by chunk, so rejected uploads are never buffered whole.
pub async fn upload_media(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let uploaded_by = header_str(&headers, USER_ID_HEADER).map(String::from);
    let mut upload = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!(field = ?field.name(), "ignoring multipart field");
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        check_media_type(&content_type)?;

        let mut data = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            state
                .media
                .check_size((data.len() + chunk.len()) as u64)?;
            data.extend_from_slice(&chunk);
        }

        upload = Some(Upload {
            field_name: UPLOAD_FIELD.to_string(),
            filename,
            content_type,
            data: data.freeze(),
            uploaded_by,
        });
        break;
    }

    let upload = upload.ok_or(MediaError::MissingFile)?;
    let outcome = state.media.ingest(upload).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "File uploaded successfully",
            media: outcome.record,
        }),
    ))
}

/// GET `/api/media?page=&limit=&type=&cursor=`
pub async fn list_media(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ListMediaQuery>,
) -> Result<Json<MediaListResponse>, AppError> {
    let category = q
        .category
        .as_deref()
        .filter(|value| !value.is_empty())
        .map(str::parse::<MediaCategory>)
        .transpose()
        .map_err(MediaError::from)?;
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let cursor = q.cursor.as_deref().filter(|value| !value.is_empty());

    let page = state.media.list(category, limit, cursor).await?;

    let base_url = request_base_url(&headers);
    let files: Vec<MediaListing> = page
        .entries
        .into_iter()
        .map(|summary| MediaListing::from_summary(summary, &base_url))
        .collect();

    Ok(Json(MediaListResponse {
        count: files.len(),
        files,
        page: q.page.unwrap_or(1),
        limit,
        next_cursor: page.next_cursor,
    }))
}

/// GET `/api/media/{id}?thumbnail=true`
pub async fn retrieve_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<RetrieveQuery>,
) -> Result<Json<RetrievedMedia>, AppError> {
    let retrieved = state.media.retrieve(&id, q.wants_thumbnail()).await?;
    Ok(Json(retrieved))
}

/// DELETE `/api/media/{id}`
pub async fn delete_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let deleted = state.media.delete(&id).await?;
    if let Some(Err(err)) = &deleted.derivative {
        debug!(key = %deleted.storage_key, error = %err, "thumbnail left behind");
    }

    Ok(Json(MessageResponse {
        message: "Media file deleted successfully",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn thumbnail_flag_truthiness() {
        let q = |v: Option<&str>| RetrieveQuery {
            thumbnail: v.map(String::from),
        };
        assert!(q(Some("true")).wants_thumbnail());
        assert!(q(Some("1")).wants_thumbnail());
        assert!(q(Some("yes")).wants_thumbnail());
        assert!(!q(Some("false")).wants_thumbnail());
        assert!(!q(Some("0")).wants_thumbnail());
        assert!(!q(Some("")).wants_thumbnail());
        assert!(!q(None).wants_thumbnail());
    }

    #[test]
    fn base_url_prefers_forwarded_proto() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_base_url(&headers), "http://localhost");

        headers.insert(header::HOST, HeaderValue::from_static("media.example.com"));
        assert_eq!(request_base_url(&headers), "http://media.example.com");

        headers.insert(
            FORWARDED_PROTO_HEADER,
            HeaderValue::from_static("https, http"),
        );
        assert_eq!(request_base_url(&headers), "https://media.example.com");
    }
}
