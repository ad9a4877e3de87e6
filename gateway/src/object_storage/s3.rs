//! `ObjectStore` over the AWS S3 SDK
//!
//! Works against AWS S3 as well as S3-compatible services such as `MinIO`
//! and `LocalStack` (see `Environment::s3_client_config`).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::{
    error::{DisplayErrorContext, SdkError},
    presigning::PresigningConfig,
    primitives::{ByteStream, DateTime as SmithyDateTime},
    types::{BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier},
    Client as S3Client,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{
    stream::{self, BoxStream},
    StreamExt, TryStreamExt,
};
use tracing::{debug, info, warn};

use super::{
    classify_sdk_error, BatchDeleteOutcome, BucketSummary, DeleteFailure, ListObjectsOptions,
    ObjectDownload, ObjectMetadata, ObjectStore, ObjectSummary, PresignedUrl, SignedMethod,
    StorageError, StorageResult, DEFAULT_CONTENT_TYPE,
};

/// S3 refuses `DeleteObjects` requests with more keys than this
const MAX_KEYS_PER_DELETE: usize = 1000;

/// Region that must not be sent as a location constraint
const DEFAULT_REGION: &str = "us-east-1";

/// Storage backend talking to an S3-compatible service
pub struct S3ObjectStore {
    s3_client: Arc<S3Client>,
    delete_batch_size: usize,
    list_page_size: Option<i32>,
}

impl S3ObjectStore {
    /// Creates a new S3 object store
    ///
    /// # Arguments
    ///
    /// * `s3_client` - Pre-configured S3 client
    #[must_use]
    pub const fn new(s3_client: Arc<S3Client>) -> Self {
        Self {
            s3_client,
            delete_batch_size: MAX_KEYS_PER_DELETE,
            list_page_size: None,
        }
    }

    /// Sends `DeleteObjects` requests of at most `size` keys (capped at the S3 limit)
    #[must_use]
    pub fn with_delete_batch_size(mut self, size: usize) -> Self {
        self.delete_batch_size = size.clamp(1, MAX_KEYS_PER_DELETE);
        self
    }

    /// Asks for at most `size` entries per `ListObjectsV2` page instead of the service default
    #[must_use]
    pub const fn with_list_page_size(mut self, size: i32) -> Self {
        self.list_page_size = Some(size);
        self
    }

    fn location_constraint(&self) -> Option<CreateBucketConfiguration> {
        let region = self.s3_client.config().region()?;
        if region.as_ref() == DEFAULT_REGION {
            return None;
        }

        Some(
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region.as_ref()))
                .build(),
        )
    }

    async fn delete_chunk(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StorageResult<BatchDeleteOutcome> {
        let objects = keys
            .iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|e| StorageError::InvalidInput(format!("Invalid object key: {e}")))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(false)
            .build()
            .map_err(|e| StorageError::InvalidInput(format!("Invalid delete request: {e}")))?;

        let output = self
            .s3_client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, &format!("delete objects in bucket {bucket}")))?;

        let mut outcome = BatchDeleteOutcome::default();
        outcome.deleted.extend(
            output
                .deleted()
                .iter()
                .filter_map(|deleted| deleted.key().map(str::to_owned)),
        );

        for error in output.errors() {
            let key = error.key().unwrap_or_default().to_owned();
            let message = error.message().unwrap_or("unknown error").to_owned();
            warn!(bucket, key = %key, message = %message, "Failed to delete object");
            outcome.failed.push(DeleteFailure {
                key,
                code: error.code().map(str::to_owned),
                message,
            });
        }

        Ok(outcome)
    }
}

/// Runs `delete_chunk` over `keys` in chunks of `chunk_size`.
///
/// A chunk whose request fails has every key reported as failed and the
/// remaining chunks still run. The call only fails as a whole when no chunk
/// request succeeded at all.
async fn delete_in_chunks<'a, F, Fut>(
    keys: &'a [String],
    chunk_size: usize,
    mut delete_chunk: F,
) -> StorageResult<BatchDeleteOutcome>
where
    F: FnMut(&'a [String]) -> Fut,
    Fut: Future<Output = StorageResult<BatchDeleteOutcome>>,
{
    let mut outcome = BatchDeleteOutcome::default();
    let mut first_error = None;
    let mut any_chunk_sent = false;

    for chunk in keys.chunks(chunk_size) {
        match delete_chunk(chunk).await {
            Ok(chunk_outcome) => {
                any_chunk_sent = true;
                outcome.deleted.extend(chunk_outcome.deleted);
                outcome.failed.extend(chunk_outcome.failed);
            }
            Err(e) => {
                warn!(keys = chunk.len(), error = %e, "Delete request failed for chunk");
                let message = e.to_string();
                outcome
                    .failed
                    .extend(chunk.iter().map(|key| DeleteFailure {
                        key: key.clone(),
                        code: None,
                        message: message.clone(),
                    }));
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if !any_chunk_sent => Err(e),
        _ => Ok(outcome),
    }
}

fn to_utc(timestamp: &SmithyDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        let result = self.s3_client.head_bucket().bucket(bucket).send().await;

        match result {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service_err))
                if service_err.err().is_not_found() || service_err.raw().status().as_u16() == 404 =>
            {
                Ok(false)
            }
            Err(e) => Err(classify_sdk_error(e, &format!("check bucket {bucket}"))),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let result = self
            .s3_client
            .create_bucket()
            .bucket(bucket)
            .set_create_bucket_configuration(self.location_constraint())
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(bucket, "Created bucket");
                Ok(())
            }
            // Lost a race against a concurrent creator of our own bucket
            Err(SdkError::ServiceError(service_err))
                if service_err.err().is_bucket_already_owned_by_you() =>
            {
                debug!(bucket, "Bucket already owned by us");
                Ok(())
            }
            Err(e) => Err(classify_sdk_error(e, &format!("create bucket {bucket}"))),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        debug!(bucket, key, size = body.len(), "Putting object");

        self.s3_client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type.unwrap_or(DEFAULT_CONTENT_TYPE))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, &format!("put object {bucket}/{key}")))?;

        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectDownload> {
        let output = self
            .s3_client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, &format!("get object {bucket}/{key}")))?;

        Ok(ObjectDownload {
            content_type: output.content_type().map(str::to_owned),
            content_length: output.content_length(),
            body: output.body,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.s3_client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, &format!("delete object {bucket}/{key}")))?;

        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StorageResult<BatchDeleteOutcome> {
        delete_in_chunks(keys, self.delete_batch_size, |chunk| {
            self.delete_chunk(bucket, chunk)
        })
        .await
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketSummary>> {
        let output = self
            .s3_client
            .list_buckets()
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, "list buckets"))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| {
                Some(BucketSummary {
                    name: bucket.name()?.to_owned(),
                    creation_date: bucket.creation_date().and_then(to_utc),
                })
            })
            .collect())
    }

    fn list_objects(
        &self,
        bucket: &str,
        options: ListObjectsOptions,
    ) -> BoxStream<'static, StorageResult<ObjectSummary>> {
        let s3_client = Arc::clone(&self.s3_client);
        let bucket = bucket.to_owned();
        let page_size = self.list_page_size;

        // `None` once the last page has been fetched, otherwise the token of the next page
        let first_page: Option<Option<String>> = Some(None);

        let pages = stream::try_unfold(first_page, move |cursor| {
            let s3_client = Arc::clone(&s3_client);
            let bucket = bucket.clone();
            let options = options.clone();

            async move {
                let Some(continuation_token) = cursor else {
                    return Ok(None);
                };

                let mut request = s3_client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .set_prefix(options.prefix)
                    .set_continuation_token(continuation_token)
                    .set_max_keys(page_size);
                if !options.recursive {
                    request = request.delimiter("/");
                }

                let output = request
                    .send()
                    .await
                    .map_err(|e| classify_sdk_error(e, &format!("list objects in {bucket}")))?;

                let mut page: Vec<ObjectSummary> = output
                    .common_prefixes()
                    .iter()
                    .filter_map(|common| common.prefix())
                    .map(ObjectSummary::directory)
                    .collect();

                page.extend(output.contents().iter().filter_map(|object| {
                    Some(ObjectSummary {
                        key: object.key()?.to_owned(),
                        size: object.size().unwrap_or_default(),
                        last_modified: object.last_modified().and_then(to_utc),
                        etag: object.e_tag().map(str::to_owned),
                        is_dir: false,
                    })
                }));

                let next_token = output.next_continuation_token().map(str::to_owned);
                let cursor = if output.is_truncated().unwrap_or(false) && next_token.is_some() {
                    Some(next_token)
                } else {
                    None
                };

                Ok(Some((page, cursor)))
            }
        });

        pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMetadata> {
        let output = self
            .s3_client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, &format!("stat object {bucket}/{key}")))?;

        Ok(ObjectMetadata {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            size: output.content_length().unwrap_or_default(),
            etag: output.e_tag().map(str::to_owned),
            content_type: output.content_type().map(str::to_owned),
            last_modified: output.last_modified().and_then(to_utc),
            user_metadata: output.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn sign_url(
        &self,
        method: SignedMethod,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> StorageResult<PresignedUrl> {
        let presigned_config = PresigningConfig::expires_in(expiry).map_err(|e| {
            StorageError::SigningFailed(format!("Failed to create presigning config: {e}"))
        })?;

        let presigned = match method {
            SignedMethod::Get => self
                .s3_client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigned_config)
                .await
                .map_err(|e| DisplayErrorContext(e).to_string()),
            SignedMethod::Put => self
                .s3_client
                .put_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigned_config)
                .await
                .map_err(|e| DisplayErrorContext(e).to_string()),
        }
        .map_err(|e| {
            StorageError::SigningFailed(format!(
                "Failed to generate presigned {} URL: {e}",
                method.as_str()
            ))
        })?;

        let expires_at: DateTime<Utc> = Utc::now() + expiry;

        debug!(
            bucket,
            key,
            method = method.as_str(),
            %expires_at,
            "Generated presigned URL"
        );

        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("20240501/{i:04}.txt")).collect()
    }

    fn all_deleted(chunk: &[String]) -> StorageResult<BatchDeleteOutcome> {
        Ok(BatchDeleteOutcome {
            deleted: chunk.to_vec(),
            failed: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_chunks_respect_size() {
        let keys = keys(2500);
        let mut chunk_sizes = Vec::new();

        let outcome = delete_in_chunks(&keys, MAX_KEYS_PER_DELETE, |chunk| {
            chunk_sizes.push(chunk.len());
            async move { all_deleted(chunk) }
        })
        .await
        .unwrap();

        assert_eq!(chunk_sizes, [1000, 1000, 500]);
        assert_eq!(outcome.deleted, keys);
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_earlier_deletions() {
        let keys = keys(1500);
        let mut calls = 0;

        let outcome = delete_in_chunks(&keys, MAX_KEYS_PER_DELETE, |chunk| {
            calls += 1;
            let fail = calls == 2;
            async move {
                if fail {
                    Err(StorageError::BackendUnavailable("connection reset".to_string()))
                } else {
                    all_deleted(chunk)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome.deleted, keys[..1000]);
        assert_eq!(outcome.failed.len(), 500);
        assert_eq!(outcome.failed[0].key, keys[1000]);
        assert!(outcome.failed[0].message.contains("connection reset"));
        assert_eq!(outcome.failed[0].code, None);
    }

    #[tokio::test]
    async fn test_per_key_failures_are_merged() {
        let keys = keys(3);

        let outcome = delete_in_chunks(&keys, 2, |chunk| async move {
            Ok(BatchDeleteOutcome {
                deleted: chunk[1..].to_vec(),
                failed: vec![DeleteFailure {
                    key: chunk[0].clone(),
                    code: Some("AccessDenied".to_string()),
                    message: "Access Denied".to_string(),
                }],
            })
        })
        .await
        .unwrap();

        assert_eq!(outcome.deleted, [keys[1].clone()]);
        let failed: Vec<&str> = outcome.failed.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(failed, [keys[0].as_str(), keys[2].as_str()]);
    }

    #[tokio::test]
    async fn test_every_chunk_failing_fails_the_call() {
        let keys = keys(5);

        let result = delete_in_chunks(&keys, 2, |_| async {
            Err(StorageError::NotFound("bucket photos".to_string()))
        })
        .await;

        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
