//! AWS S3 and S3-compatible object store

use super::config::StoreConfig;
use super::error::{StoreError, StoreResult};
use super::{FetchStream, ObjectLocation, ObjectStore, PutReceipt};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as AwsS3Client;
use bytes::Bytes;
use futures::stream;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

/// Object store backed by the AWS SDK
///
/// One client serves every bucket, so the same store can be the source and the
/// destination of a relay.
#[derive(Clone)]
pub struct S3Store {
    client: AwsS3Client,
    part_size: u64,
}

impl S3Store {
    /// Create a store from configuration
    ///
    /// # Example
    ///
    /// ```no_run
    /// use orbit_relay::store::{S3Store, StoreConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = StoreConfig::default().with_region("us-east-1");
    ///     let store = S3Store::connect(&config).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let client = build_aws_client(config).await;
        Ok(Self::from_client(client, config.part_size))
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: AwsS3Client, part_size: u64) -> Self {
        Self { client, part_size }
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    async fn put_single(&self, location: &ObjectLocation, data: Bytes) -> StoreResult<PutReceipt> {
        let size = data.len() as u64;
        let response = self
            .client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(StoreError::from)?;

        Ok(PutReceipt {
            bytes: size,
            etag: response.e_tag().map(str::to_string),
            parts: 1,
        })
    }

    async fn put_multipart(
        &self,
        location: &ObjectLocation,
        first: Bytes,
        body: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StoreResult<PutReceipt> {
        let upload_id = self
            .client
            .create_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(StoreError::from)?
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Multipart("No upload ID returned".to_string()))?;
        debug!(destination = %location, %upload_id, "Started multipart upload");

        // Covers the put future being dropped before it finishes
        let mut guard = AbortGuard::new(self.client.clone(), location, &upload_id);

        let result = self.upload_parts(location, &upload_id, first, body).await;
        guard.disarm();
        if let Err(e) = &result {
            debug!(destination = %location, %upload_id, error = %e, "Aborting multipart upload");
            if let Err(abort_error) = abort_upload(&self.client, location, &upload_id).await {
                warn!(
                    destination = %location,
                    %upload_id,
                    error = %abort_error,
                    "Failed to abort multipart upload"
                );
            }
        }
        result
    }

    async fn upload_parts(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        first: Bytes,
        body: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StoreResult<PutReceipt> {
        let mut completed = Vec::new();
        let mut total = 0u64;
        let mut part = first;
        let mut part_number = 1i32;

        // One part in flight: the next part is only read once this one is stored
        while !part.is_empty() {
            let size = part.len();
            let response = self
                .client
                .upload_part()
                .bucket(&location.bucket)
                .key(&location.key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(part))
                .send()
                .await
                .map_err(StoreError::from)?;

            let etag = response
                .e_tag()
                .ok_or_else(|| StoreError::Multipart("No ETag returned for part".to_string()))?;
            completed.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build(),
            );
            total += size as u64;
            debug!(part_number, size, "Uploaded part");

            part_number += 1;
            part = read_part(body, self.part_size).await?;
        }

        let parts = completed.len() as u32;
        let response = self
            .client
            .complete_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(StoreError::from)?;

        Ok(PutReceipt {
            bytes: total,
            etag: response.e_tag().map(str::to_string),
            parts,
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn fetch(&self, location: &ObjectLocation) -> StoreResult<FetchStream> {
        let response = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| match StoreError::from(e) {
                err if err.is_not_found() => StoreError::NotFound {
                    bucket: location.bucket.clone(),
                    key: location.key.clone(),
                },
                err => err,
            })?;

        let body = stream::unfold(Some(response.body), |state| async move {
            let mut body = state?;
            match body.try_next().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(body))),
                Ok(None) => None,
                // Nothing follows a body error
                Err(e) => Some((
                    Err(StoreError::Network(format!("Failed to read response body: {}", e))),
                    None,
                )),
            }
        });

        Ok(Box::pin(body))
    }

    async fn put(
        &self,
        location: &ObjectLocation,
        body: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StoreResult<PutReceipt> {
        let first = read_part(body, self.part_size).await?;
        if (first.len() as u64) < self.part_size {
            return self.put_single(location, first).await;
        }
        self.put_multipart(location, first, body).await
    }
}

async fn abort_upload(
    client: &AwsS3Client,
    location: &ObjectLocation,
    upload_id: &str,
) -> StoreResult<()> {
    client
        .abort_multipart_upload()
        .bucket(&location.bucket)
        .key(&location.key)
        .upload_id(upload_id)
        .send()
        .await
        .map_err(StoreError::from)?;
    Ok(())
}

/// Aborts an unfinished multipart upload when dropped while armed
struct AbortGuard {
    client: AwsS3Client,
    location: ObjectLocation,
    upload_id: String,
    armed: bool,
}

impl AbortGuard {
    fn new(client: AwsS3Client, location: &ObjectLocation, upload_id: &str) -> Self {
        Self {
            client,
            location: location.clone(),
            upload_id: upload_id.to_string(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                destination = %self.location,
                upload_id = %self.upload_id,
                "No runtime to abort dropped multipart upload"
            );
            return;
        };

        let client = self.client.clone();
        let location = self.location.clone();
        let upload_id = std::mem::take(&mut self.upload_id);
        handle.spawn(async move {
            match abort_upload(&client, &location, &upload_id).await {
                Ok(()) => debug!(destination = %location, %upload_id, "Aborted dropped multipart upload"),
                Err(e) => warn!(
                    destination = %location,
                    %upload_id,
                    error = %e,
                    "Failed to abort dropped multipart upload"
                ),
            }
        });
    }
}

/// Read up to `part_size` bytes; a short part means the body is exhausted
async fn read_part(
    body: &mut (dyn AsyncRead + Unpin + Send),
    part_size: u64,
) -> StoreResult<Bytes> {
    let mut buffer = Vec::with_capacity(usize::try_from(part_size).unwrap_or(0));
    (&mut *body)
        .take(part_size)
        .read_to_end(&mut buffer)
        .await?;
    Ok(Bytes::from(buffer))
}

/// Build the AWS SDK S3 client from configuration
async fn build_aws_client(config: &StoreConfig) -> AwsS3Client {
    let mut aws_config_loader = aws_config::defaults(BehaviorVersion::latest());

    let region_provider = if let Some(region_str) = &config.region {
        RegionProviderChain::first_try(Region::new(region_str.clone()))
    } else {
        RegionProviderChain::default_provider()
    };
    aws_config_loader = aws_config_loader.region(region_provider);

    if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
        let credentials = Credentials::new(
            access_key,
            secret_key,
            config.session_token.clone(),
            None,
            "orbit-relay-explicit",
        );
        aws_config_loader = aws_config_loader.credentials_provider(credentials);
    }

    let aws_config = aws_config_loader.load().await;
    let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);

    if let Some(endpoint) = &config.endpoint {
        s3_config_builder = s3_config_builder.endpoint_url(endpoint);
    }

    // Required for MinIO, LocalStack
    if config.force_path_style {
        s3_config_builder = s3_config_builder.force_path_style(true);
    }

    let timeout_config = aws_sdk_s3::config::timeout::TimeoutConfig::builder()
        .operation_timeout(Duration::from_secs(config.timeout_seconds))
        .build();
    s3_config_builder = s3_config_builder.timeout_config(timeout_config);

    AwsS3Client::from_conf(s3_config_builder.build())
}

#[cfg(test)]
mod tests {
    //! Live tests against a real bucket
    //!
    //! - `S3_TESTS_ENABLED`: set to "1" to enable
    //! - `S3_TEST_BUCKET`: bucket to write to (default: orbit-relay-test)
    //! - `S3_TEST_REGION`, `S3_TEST_ENDPOINT`: optional overrides

    use super::*;
    use crate::store::MIN_PART_SIZE;
    use futures::TryStreamExt;
    use std::env;

    fn s3_tests_enabled() -> bool {
        env::var("S3_TESTS_ENABLED").unwrap_or_default() == "1"
    }

    fn test_config() -> StoreConfig {
        let mut config = StoreConfig::default();
        config.region = env::var("S3_TEST_REGION").ok();
        if let Ok(endpoint) = env::var("S3_TEST_ENDPOINT") {
            config.endpoint = Some(endpoint);
            config.force_path_style = true;
        }
        config.part_size = MIN_PART_SIZE;
        config
    }

    fn test_location(key: &str) -> ObjectLocation {
        let bucket = env::var("S3_TEST_BUCKET").unwrap_or_else(|_| "orbit-relay-test".to_string());
        ObjectLocation::new(bucket, key)
    }

    #[tokio::test]
    async fn test_read_part_splits_body() {
        let data = vec![3u8; 10];
        let mut body: &[u8] = &data;

        assert_eq!(read_part(&mut body, 4).await.unwrap().len(), 4);
        assert_eq!(read_part(&mut body, 4).await.unwrap().len(), 4);
        assert_eq!(read_part(&mut body, 4).await.unwrap().len(), 2);
        assert!(read_part(&mut body, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore]
    async fn test_put_and_fetch_small_object() {
        if !s3_tests_enabled() {
            println!("Skipping S3 integration test - set S3_TESTS_ENABLED=1 to run");
            return;
        }

        let store = S3Store::connect(&test_config())
            .await
            .expect("Failed to create store");
        let location = test_location("orbit-relay/small.txt");
        let mut body: &[u8] = b"Hi there, this is a test file";

        let receipt = store.put(&location, &mut body).await.unwrap();
        assert_eq!(receipt.bytes, 29);
        assert_eq!(receipt.parts, 1);

        let chunks: Vec<Bytes> = store.fetch(&location).await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"Hi there, this is a test file");
    }

    #[tokio::test]
    #[ignore]
    async fn test_put_multipart_object() {
        if !s3_tests_enabled() {
            return;
        }

        let store = S3Store::connect(&test_config())
            .await
            .expect("Failed to create store");
        let location = test_location("orbit-relay/multipart.bin");
        let data: Vec<u8> = (0..MIN_PART_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        let mut body: &[u8] = &data;

        let receipt = store.put(&location, &mut body).await.unwrap();
        assert_eq!(receipt.parts, 3);
        assert_eq!(receipt.bytes, data.len() as u64);

        let chunks: Vec<Bytes> = store.fetch(&location).await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    #[ignore]
    async fn test_fetch_missing_object() {
        if !s3_tests_enabled() {
            return;
        }

        let store = S3Store::connect(&test_config())
            .await
            .expect("Failed to create store");
        let result = store.fetch(&test_location("orbit-relay/does-not-exist")).await;
        assert!(matches!(result, Err(ref e) if e.is_not_found()));
    }
}
