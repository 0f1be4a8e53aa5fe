//! Amazon S3 (or S3-compatible) object store.

use async_trait::async_trait;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;

use crate::store::{ObjectStore, StorageError, UploadedPart};

/// Connection settings for one bucket.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint (MinIO, LocalStack). Enables path-style addressing.
    pub endpoint: Option<String>,
}

#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

fn backend<E: std::error::Error>(action: &str, key: &str, e: E) -> StorageError {
    StorageError::Backend(format!("{action} {key}: {}", DisplayErrorContext(e)))
}

impl S3Store {
    /// Build a client from the default AWS credential chain.
    pub async fn connect(config: S3Config) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        tracing::info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint,
            "S3 store initialized",
        );

        Self::from_client(Client::from_conf(builder.build()), config.bucket)
    }

    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        tracing::debug!(bucket = %self.bucket, key, "Downloading object");

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    backend("GetObject", key, e)
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| backend("read body of", key, e))?
            .into_bytes()
            .to_vec();

        tracing::debug!(bucket = %self.bucket, key, bytes = data.len(), "Downloaded object");
        Ok(data)
    }

    async fn create_multipart(&self, key: &str, content_type: &str) -> Result<String, StorageError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| backend("CreateMultipartUpload", key, e))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Backend(format!("no upload id returned for {key}")))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<UploadedPart, StorageError> {
        let size = body.len();
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| backend("UploadPart", key, e))?;

        let etag = output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Backend(format!("no etag for part {part_number} of {key}")))?;

        tracing::debug!(bucket = %self.bucket, key, part_number, bytes = size, "Uploaded part");
        Ok(UploadedPart { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), StorageError> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|p| {
                        CompletedPart::builder()
                            .part_number(p.part_number)
                            .e_tag(&p.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| backend("CompleteMultipartUpload", key, e))?;

        tracing::info!(bucket = %self.bucket, key, parts = parts.len(), "Multipart upload completed");
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| backend("AbortMultipartUpload", key, e))?;
        Ok(())
    }

    fn uri(&self, key: &str) -> String {
        format!("s3://{}/{key}", self.bucket)
    }
}
