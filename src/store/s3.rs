use super::{ObjectMetadata, ObjectStore, StoreError, StoreResult};
use crate::models::object::{ListObjectsPage, ListObjectsParams, ObjectSummary, PutObjectOutput};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client as S3Client, config::Builder as S3ConfigBuilder, presigning::PresigningConfig,
    primitives::ByteStream,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Connection settings for an S3 or S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for MinIO/LocalStack.
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

impl S3Settings {
    /// Same shape as the `Location` S3 reports for an upload.
    pub fn object_url(&self, key: &str) -> String {
        let bucket = &self.bucket;
        match &self.endpoint_url {
            Some(endpoint) if self.force_path_style => {
                format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key)
            }
            Some(endpoint) => match endpoint.split_once("://") {
                Some((scheme, host)) => {
                    format!("{scheme}://{bucket}.{}/{key}", host.trim_end_matches('/'))
                }
                None => format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key),
            },
            None => format!("https://{bucket}.s3.{}.amazonaws.com/{key}", self.region),
        }
    }
}

/// [`ObjectStore`] over the AWS SDK. Signed URLs are native presigned GETs.
pub struct S3Store {
    client: S3Client,
    settings: S3Settings,
}

impl S3Store {
    /// Build a client from the default credential chain.
    pub async fn connect(settings: S3Settings) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&aws_config);
        if let Some(endpoint_url) = &settings.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }
        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }

        info!(
            bucket = %settings.bucket,
            region = %settings.region,
            "S3 store initialized"
        );

        Self {
            client: S3Client::from_conf(builder.build()),
            settings,
        }
    }
}

fn s3_error(context: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::S3(format!("{context}: {err}"))
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.settings.bucket
    }

    fn object_url(&self, key: &str) -> String {
        self.settings.object_url(key)
    }

    #[instrument(skip(self, data, metadata), fields(bucket = %self.settings.bucket))]
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> StoreResult<PutObjectOutput> {
        let size = data.len() as u64;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.settings.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type);
        for (name, value) in metadata {
            request = request.metadata(name, value);
        }

        let output = request
            .send()
            .await
            .map_err(|err| s3_error("failed to upload object", err))?;

        debug!(key = %key, size, "object uploaded to S3");
        Ok(PutObjectOutput {
            url: self.object_url(key),
            etag: output.e_tag().unwrap_or_default().trim_matches('"').to_string(),
            size,
        })
    }

    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        let object = self
            .client
            .get_object()
            .bucket(&self.settings.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    StoreError::ObjectNotFound {
                        bucket: self.settings.bucket.clone(),
                        key: key.to_string(),
                    }
                } else {
                    s3_error("failed to download object", err)
                }
            })?;

        let body = object
            .body
            .collect()
            .await
            .map_err(|err| s3_error("failed to read object body", err))?;
        Ok(body.into_bytes())
    }

    async fn head_object(&self, key: &str) -> StoreResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.settings.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(s3_error("failed to check object existence", err))
                }
            }
        }
    }

    #[instrument(skip(self), fields(bucket = %self.settings.bucket))]
    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(&self.settings.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| s3_error("failed to delete object", err))?;

        debug!(key = %key, "object deleted from S3");
        Ok(())
    }

    async fn list_objects(&self, params: ListObjectsParams) -> StoreResult<ListObjectsPage> {
        let max_keys = params.max_keys.clamp(1, 1000) as i32;
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.settings.bucket)
            .prefix(&params.prefix)
            .set_start_after(params.start_after)
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|err| s3_error("failed to list objects", err))?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?.to_string();
                let last_modified = obj
                    .last_modified()
                    .and_then(|ts| DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos()))
                    .unwrap_or_default();
                Some(ObjectSummary {
                    key,
                    size_bytes: obj.size().unwrap_or_default().max(0) as u64,
                    last_modified,
                })
            })
            .collect();

        Ok(ListObjectsPage {
            objects,
            is_truncated: response.is_truncated().unwrap_or(false),
        })
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        let presigning =
            PresigningConfig::expires_in(ttl).map_err(|err| StoreError::Signing(err.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.settings.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|err| StoreError::Signing(err.to_string()))?;
        Ok(request.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(endpoint: Option<&str>, force_path_style: bool) -> S3Settings {
        S3Settings {
            bucket: "media-bucket".into(),
            region: "eu-west-2".into(),
            endpoint_url: endpoint.map(String::from),
            force_path_style,
        }
    }

    #[test]
    fn object_url_matches_upload_location() {
        assert_eq!(
            settings(None, false).object_url("media/images/a.png"),
            "https://media-bucket.s3.eu-west-2.amazonaws.com/media/images/a.png"
        );
        assert_eq!(
            settings(Some("http://localhost:9000/"), true).object_url("media/images/a.png"),
            "http://localhost:9000/media-bucket/media/images/a.png"
        );
        assert_eq!(
            settings(Some("https://s3.example.com"), false).object_url("media/videos/b.mp4"),
            "https://media-bucket.s3.example.com/media/videos/b.mp4"
        );
    }
}
