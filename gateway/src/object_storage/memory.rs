//! In-memory `ObjectStore` for tests
//!
//! Keeps buckets and objects in ordered maps and lets tests inject
//! backend outages, signing failures and per-key delete failures.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use sha2::{Digest, Sha256};

use super::{
    BatchDeleteOutcome, BucketSummary, DeleteFailure, ListObjectsOptions, ObjectDownload,
    ObjectMetadata, ObjectStore, ObjectSummary, PresignedUrl, SignedMethod, StorageError,
    StorageResult, DEFAULT_CONTENT_TYPE,
};

struct StoredObject {
    body: Bytes,
    content_type: String,
    etag: String,
    last_modified: DateTime<Utc>,
}

struct MemoryBucket {
    created_at: DateTime<Utc>,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Default)]
struct State {
    buckets: BTreeMap<String, MemoryBucket>,
    unavailable: bool,
    signing_broken: bool,
    undeletable: HashSet<String>,
    create_bucket_calls: usize,
}

/// Object store backed by process memory
#[derive(Default)]
pub struct InMemoryObjectStore {
    state: Mutex<State>,
}

impl InMemoryObjectStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every call fail with `BackendUnavailable` while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Makes `sign_url` fail with `SigningFailed` while set
    pub fn set_signing_broken(&self, broken: bool) {
        self.lock().signing_broken = broken;
    }

    /// Makes batch deletes report a failure for `key`
    pub fn refuse_delete(&self, key: impl Into<String>) {
        self.lock().undeletable.insert(key.into());
    }

    /// Number of `create_bucket` calls seen so far
    #[must_use]
    pub fn create_bucket_calls(&self) -> usize {
        self.lock().create_bucket_calls
    }

    /// Returns the stored bytes of an object, if present
    #[must_use]
    pub fn object_bytes(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.lock()
            .buckets
            .get(bucket)?
            .objects
            .get(key)
            .map(|object| object.body.clone())
    }
}

impl State {
    fn ensure_available(&self) -> StorageResult<()> {
        if self.unavailable {
            return Err(StorageError::BackendUnavailable(
                "in-memory backend switched off".to_string(),
            ));
        }
        Ok(())
    }

    fn bucket(&self, bucket: &str) -> StorageResult<&MemoryBucket> {
        self.ensure_available()?;
        self.buckets
            .get(bucket)
            .ok_or_else(|| StorageError::NotFound(format!("bucket {bucket}")))
    }

    fn bucket_mut(&mut self, bucket: &str) -> StorageResult<&mut MemoryBucket> {
        self.ensure_available()?;
        self.buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::NotFound(format!("bucket {bucket}")))
    }

    fn object(&self, bucket: &str, key: &str) -> StorageResult<&StoredObject> {
        self.bucket(bucket)?
            .objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(format!("object {bucket}/{key}")))
    }
}

fn list_entries(
    bucket: &MemoryBucket,
    options: &ListObjectsOptions,
) -> Vec<StorageResult<ObjectSummary>> {
    let prefix = options.prefix.as_deref().unwrap_or_default();
    let mut directories = BTreeSet::new();
    let mut files = Vec::new();

    for (key, object) in bucket.objects.range(prefix.to_string()..) {
        let Some(rest) = key.strip_prefix(prefix) else {
            break;
        };

        match rest.find('/') {
            Some(slash) if !options.recursive => {
                directories.insert(format!("{prefix}{}", &rest[..=slash]));
            }
            _ => files.push(ObjectSummary {
                key: key.clone(),
                size: i64::try_from(object.body.len()).unwrap_or(i64::MAX),
                last_modified: Some(object.last_modified),
                etag: Some(object.etag.clone()),
                is_dir: false,
            }),
        }
    }

    directories
        .into_iter()
        .map(ObjectSummary::directory)
        .chain(files)
        .map(Ok)
        .collect()
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        let state = self.lock();
        state.ensure_available()?;
        Ok(state.buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut state = self.lock();
        state.ensure_available()?;
        state.create_bucket_calls += 1;
        state
            .buckets
            .entry(bucket.to_string())
            .or_insert_with(|| MemoryBucket {
                created_at: Utc::now(),
                objects: BTreeMap::new(),
            });
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        let mut state = self.lock();
        let etag = hex::encode(Sha256::digest(&body));
        state.bucket_mut(bucket)?.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_string(),
                etag,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectDownload> {
        let state = self.lock();
        let object = state.object(bucket, key)?;
        Ok(ObjectDownload {
            content_type: Some(object.content_type.clone()),
            content_length: i64::try_from(object.body.len()).ok(),
            body: ByteStream::from(object.body.clone()),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        // Deleting a missing key succeeds, as it does on S3
        self.lock().bucket_mut(bucket)?.objects.remove(key);
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StorageResult<BatchDeleteOutcome> {
        let mut state = self.lock();
        let undeletable = state.undeletable.clone();
        let objects = &mut state.bucket_mut(bucket)?.objects;

        let mut outcome = BatchDeleteOutcome::default();
        for key in keys {
            if undeletable.contains(key) {
                outcome.failed.push(DeleteFailure {
                    key: key.clone(),
                    code: Some("AccessDenied".to_string()),
                    message: "Access Denied".to_string(),
                });
            } else {
                objects.remove(key);
                outcome.deleted.push(key.clone());
            }
        }
        Ok(outcome)
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketSummary>> {
        let state = self.lock();
        state.ensure_available()?;
        Ok(state
            .buckets
            .iter()
            .map(|(name, bucket)| BucketSummary {
                name: name.clone(),
                creation_date: Some(bucket.created_at),
            })
            .collect())
    }

    fn list_objects(
        &self,
        bucket: &str,
        options: ListObjectsOptions,
    ) -> BoxStream<'static, StorageResult<ObjectSummary>> {
        let state = self.lock();
        let entries = match state.bucket(bucket) {
            Ok(bucket) => list_entries(bucket, &options),
            Err(e) => vec![Err(e)],
        };
        stream::iter(entries).boxed()
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMetadata> {
        let state = self.lock();
        let object = state.object(bucket, key)?;
        Ok(ObjectMetadata {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: i64::try_from(object.body.len()).unwrap_or(i64::MAX),
            etag: Some(object.etag.clone()),
            content_type: Some(object.content_type.clone()),
            last_modified: Some(object.last_modified),
            user_metadata: HashMap::new(),
        })
    }

    async fn sign_url(
        &self,
        method: SignedMethod,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> StorageResult<PresignedUrl> {
        let state = self.lock();
        state.ensure_available()?;
        if state.signing_broken {
            return Err(StorageError::SigningFailed(
                "in-memory signer switched off".to_string(),
            ));
        }

        Ok(PresignedUrl {
            url: format!(
                "memory://{bucket}/{key}?X-Amz-Method={}&X-Amz-Expires={}",
                method.as_str(),
                expiry.as_secs()
            ),
            expires_at: Utc::now() + expiry,
        })
    }
}
