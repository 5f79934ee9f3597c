//! Signed downloads for the local backend.
//! Streams object bodies from disk to avoid buffering them in memory.

use super::AppState;
use crate::{
    errors::AppError,
    models::object::Object,
    store::{ObjectMetadata, signing::SignatureError},
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct SignedObjectQuery {
    pub expires: Option<i64>,
    pub signature: Option<String>,
}

/// GET `/objects/{*key}?expires=&signature=`
pub async fn get_signed_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<SignedObjectQuery>,
) -> Result<Response, AppError> {
    let store = state
        .local
        .as_ref()
        .ok_or_else(|| AppError::not_found("Object not found"))?;

    let (Some(expires), Some(signature)) = (q.expires, q.signature.as_deref()) else {
        return Err(SignatureError::Malformed.into());
    };
    store.verify_signature(&key, expires, signature)?;

    let (meta, file) = store.open_reader(&key).await?;
    let user_meta = store.object_metadata(&key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    set_metadata_headers(response.headers_mut(), &user_meta);

    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &Object) {
    let content_type = meta
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.size_bytes.max(0) as u64),
    );

    if let Some(etag) = meta.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\"")) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

/// Stored metadata as `x-amz-meta-<name>` headers; unrepresentable pairs are skipped.
fn set_metadata_headers(headers: &mut HeaderMap, metadata: &ObjectMetadata) {
    for (name, value) in metadata {
        let name = format!("x-amz-meta-{}", name.to_ascii_lowercase());
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
}
