//! Thumbnail derivatives for image uploads.
//!
//! A thumbnail fits inside a 300×300 box with the source aspect ratio and is
//! never larger than the source. Output is always JPEG at quality 80. Codec
//! work runs on the blocking pool.

use crate::services::naming::derivative_key;
use crate::store::{ObjectMetadata, ObjectStore, StoreError};
use bytes::Bytes;
use image::{DynamicImage, ImageError, codecs::jpeg::JpegEncoder, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

pub const THUMBNAIL_MAX_WIDTH: u32 = 300;
pub const THUMBNAIL_MAX_HEIGHT: u32 = 300;
pub const THUMBNAIL_JPEG_QUALITY: u8 = 80;
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum DerivativeError {
    #[error("could not decode image: {0}")]
    Decode(#[source] ImageError),
    #[error("could not encode thumbnail: {0}")]
    Encode(#[source] ImageError),
    #[error("key `{0}` has no extension to derive a thumbnail key from")]
    NoExtension(String),
    #[error("thumbnail task failed: {0}")]
    Task(String),
    #[error("could not store thumbnail: {0}")]
    Store(#[from] StoreError),
}

/// A stored thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivative {
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

/// Encoded thumbnail, not yet stored.
#[derive(Debug)]
pub struct Thumbnail {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode `bytes`, shrink to fit the thumbnail box and re-encode as JPEG.
pub fn render_thumbnail(bytes: &[u8]) -> Result<Thumbnail, DerivativeError> {
    let source = image::load_from_memory(bytes).map_err(DerivativeError::Decode)?;

    let fitted = if source.width() <= THUMBNAIL_MAX_WIDTH && source.height() <= THUMBNAIL_MAX_HEIGHT
    {
        source
    } else {
        source.resize(THUMBNAIL_MAX_WIDTH, THUMBNAIL_MAX_HEIGHT, FilterType::Lanczos3)
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(fitted.to_rgb8());
    let mut data = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(
        &mut data,
        THUMBNAIL_JPEG_QUALITY,
    ))
    .map_err(DerivativeError::Encode)?;

    Ok(Thumbnail {
        data,
        width: rgb.width(),
        height: rgb.height(),
    })
}

/// Render a thumbnail of `original` and store it under the derivative key of
/// `original_key`.
pub async fn generate(
    store: &dyn ObjectStore,
    original_key: &str,
    original: Bytes,
) -> Result<Derivative, DerivativeError> {
    let key = derivative_key(original_key)
        .ok_or_else(|| DerivativeError::NoExtension(original_key.to_string()))?;

    let thumbnail = tokio::task::spawn_blocking(move || render_thumbnail(&original))
        .await
        .map_err(|err| DerivativeError::Task(err.to_string()))??;

    let size_bytes = thumbnail.data.len() as u64;
    store
        .put_object(
            &key,
            Bytes::from(thumbnail.data),
            THUMBNAIL_CONTENT_TYPE,
            &ObjectMetadata::new(),
        )
        .await?;

    debug!(
        key = %key,
        width = thumbnail.width,
        height = thumbnail.height,
        size_bytes,
        "stored thumbnail"
    );

    Ok(Derivative {
        key,
        width: thumbnail.width,
        height: thumbnail.height,
        size_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 90, 128]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn landscape_is_scaled_into_box() {
        let thumb = render_thumbnail(&png(640, 480)).unwrap();
        assert_eq!((thumb.width, thumb.height), (300, 225));
        assert_eq!(
            image::guess_format(&thumb.data).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn portrait_is_scaled_into_box() {
        let thumb = render_thumbnail(&png(200, 800)).unwrap();
        assert_eq!((thumb.width, thumb.height), (75, 300));
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let thumb = render_thumbnail(&png(120, 40)).unwrap();
        assert_eq!((thumb.width, thumb.height), (120, 40));
        assert_eq!(
            image::guess_format(&thumb.data).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            render_thumbnail(b"definitely not an image"),
            Err(DerivativeError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn generate_stores_jpeg_next_to_original() {
        let store = MemoryStore::new("media");
        let derivative = generate(&store, "media/images/abc.png", Bytes::from(png(900, 300)))
            .await
            .unwrap();

        assert_eq!(derivative.key, "media/images/abc_thumb.png");
        assert_eq!((derivative.width, derivative.height), (300, 100));
        let stored = store.object("media/images/abc_thumb.png").unwrap();
        assert_eq!(stored.content_type, THUMBNAIL_CONTENT_TYPE);
        assert_eq!(stored.data.len() as u64, derivative.size_bytes);
    }

    #[tokio::test]
    async fn generate_without_extension_stores_nothing() {
        let store = MemoryStore::new("media");
        let result = generate(&store, "media/images/abc", Bytes::from(png(10, 10))).await;
        assert!(matches!(result, Err(DerivativeError::NoExtension(_))));
        assert_eq!(store.mutation_count(), 0);
    }
}
