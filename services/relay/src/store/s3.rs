use super::{ArtifactStore, Object, RelayError};
use crate::config::StoreConfig;
use crate::keys::RemoteKey;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// S3 writer for relayed replays
pub struct S3ArtifactStore {
    client: S3Client,
    bucket: String,
    multipart_threshold: usize,
    part_size: usize,
}

impl S3ArtifactStore {
    /// Create a new S3 store
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 artifact store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            multipart_threshold: config.multipart_threshold_bytes,
            part_size: config.part_size_bytes,
        })
    }

    /// Single-part upload for small objects
    async fn simple_upload(&self, key: &str, object: Object) -> Result<(), RelayError> {
        let metadata: HashMap<String, String> = object.metadata.into_iter().collect();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(object.body))
            .content_type(object.content_type)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| upload_error(key, DisplayErrorContext(&e)))?;

        Ok(())
    }

    /// Multipart upload for large objects
    async fn multipart_upload(&self, key: &str, object: Object) -> Result<(), RelayError> {
        let metadata: HashMap<String, String> = object.metadata.into_iter().collect();

        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(object.content_type)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| upload_error(key, DisplayErrorContext(&e)))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| upload_error(key, "no upload ID in response"))?
            .to_string();

        match self.upload_parts(key, &upload_id, &object.body).await {
            Ok(parts) => {
                let completed_upload = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();

                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed_upload)
                    .send()
                    .await
                    .map_err(|e| upload_error(key, DisplayErrorContext(&e)))?;

                Ok(())
            }
            Err(e) => {
                // Drop the stored parts; the pipeline does not resume uploads
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        key = %key,
                        error = %DisplayErrorContext(&abort_err),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        body: &bytes::Bytes,
    ) -> Result<Vec<CompletedPart>, RelayError> {
        let mut completed_parts = Vec::new();

        for (index, range) in part_ranges(body.len(), self.part_size).into_iter().enumerate() {
            let part_number = index as i32 + 1;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(body.slice(range)))
                .send()
                .await
                .map_err(|e| upload_error(key, DisplayErrorContext(&e)))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        Ok(completed_parts)
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    #[instrument(skip(self, object), fields(key = %key, size_bytes = object.body.len()))]
    async fn put(&self, key: &RemoteKey, object: Object) -> Result<(), RelayError> {
        let size = object.body.len();

        debug!(bucket = %self.bucket, "Uploading object to S3");

        if size > self.multipart_threshold {
            self.multipart_upload(key.as_str(), object).await?;
        } else {
            self.simple_upload(key.as_str(), object).await?;
        }

        info!(size_bytes = size, "Object uploaded to S3");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "s3"
    }
}

fn upload_error(key: &str, message: impl std::fmt::Display) -> RelayError {
    RelayError::Upload {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Byte ranges of the parts of a multipart upload
fn part_ranges(len: usize, part_size: usize) -> Vec<std::ops::Range<usize>> {
    let part_size = part_size.max(1);
    (0..len)
        .step_by(part_size)
        .map(|start| start..(start + part_size).min(len))
        .collect()
}
