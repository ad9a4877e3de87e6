//! Object storage capability and the types that cross it
//!
//! Every backend (S3-compatible services, the in-memory test double)
//! implements [`ObjectStore`]. Callers hold an `Arc<dyn ObjectStore>` that is
//! built once by the composition root and passed in explicitly.

mod error;
#[cfg(any(test, feature = "test-utils"))]
mod memory;
mod s3;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

pub(crate) use error::classify_sdk_error;
pub use error::{StorageError, StorageResult};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryObjectStore;
pub use s3::S3ObjectStore;

/// Content type used when the uploader does not provide one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Longest object key S3 accepts, in bytes of UTF-8
pub const MAX_KEY_BYTES: usize = 1024;

/// HTTP method a presigned URL is issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedMethod {
    /// Download the object
    Get,
    /// Upload the object
    Put,
}

impl SignedMethod {
    /// Upper-case HTTP method name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

/// Presigned URL with expiration information
#[derive(Debug, Clone)]
pub struct PresignedUrl {
    /// The presigned URL
    pub url: String,
    /// UTC timestamp when the URL expires
    pub expires_at: DateTime<Utc>,
}

/// A bucket as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSummary {
    /// Bucket name
    pub name: String,
    /// Creation time, if the backend reports one
    pub creation_date: Option<DateTime<Utc>>,
}

/// One entry of an object listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Object key, or the common prefix for directory entries
    pub key: String,
    /// Size in bytes (0 for directory entries)
    pub size: i64,
    /// Last modification time
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity tag
    pub etag: Option<String>,
    /// Whether this entry is a common prefix of a non-recursive listing
    pub is_dir: bool,
}

impl ObjectSummary {
    /// Directory entry for a common prefix
    #[must_use]
    pub fn directory(prefix: impl Into<String>) -> Self {
        Self {
            key: prefix.into(),
            size: 0,
            last_modified: None,
            etag: None,
            is_dir: true,
        }
    }
}

/// Options for [`ObjectStore::list_objects`]
#[derive(Debug, Clone, Default)]
pub struct ListObjectsOptions {
    /// Only list keys starting with this prefix
    pub prefix: Option<String>,
    /// Descend into "/"-separated sub-paths instead of collapsing them
    pub recursive: bool,
}

/// Object metadata as returned by a stat call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Bucket holding the object
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Size in bytes
    pub size: i64,
    /// Entity tag
    pub etag: Option<String>,
    /// Stored content type
    pub content_type: Option<String>,
    /// Last modification time
    pub last_modified: Option<DateTime<Utc>>,
    /// User-defined metadata
    pub user_metadata: HashMap<String, String>,
}

/// Streamed object body with its headers
#[derive(Debug)]
pub struct ObjectDownload {
    /// Stored content type
    pub content_type: Option<String>,
    /// Length of the body in bytes
    pub content_length: Option<i64>,
    /// Object body
    pub body: ByteStream,
}

/// A key the backend refused to delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    /// Object key
    pub key: String,
    /// Backend error code
    pub code: Option<String>,
    /// Backend error message
    pub message: String,
}

/// Per-key result of a batch delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteOutcome {
    /// Keys that were deleted
    pub deleted: Vec<String>,
    /// Keys that could not be deleted
    pub failed: Vec<DeleteFailure>,
}

/// Capabilities of an object storage backend
///
/// Implementations must be safe to share between concurrent requests.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns whether the bucket exists
    ///
    /// # Errors
    ///
    /// Returns `StorageError::BackendUnavailable` if the check fails
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    /// Creates a bucket. Succeeds if the bucket already exists and is ours.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::BackendUnavailable` if creation fails
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Stores an object
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the bucket is missing
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()>;

    /// Opens an object for streaming
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the bucket or object is missing
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectDownload>;

    /// Deletes a single object
    ///
    /// # Errors
    ///
    /// Returns `StorageError::BackendUnavailable` if the call fails
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Deletes several objects, reporting failures per key
    ///
    /// # Errors
    ///
    /// Only fails as a whole when no delete request succeeded, e.g. the
    /// bucket is missing or the backend cannot be reached. Keys of a request
    /// that failed after an earlier one succeeded are reported in `failed`.
    async fn delete_objects(&self, bucket: &str, keys: &[String])
        -> StorageResult<BatchDeleteOutcome>;

    /// Lists all buckets
    ///
    /// # Errors
    ///
    /// Returns `StorageError::BackendUnavailable` if the call fails
    async fn list_buckets(&self) -> StorageResult<Vec<BucketSummary>>;

    /// Lazily lists the objects of a bucket. An empty bucket yields nothing.
    fn list_objects(
        &self,
        bucket: &str,
        options: ListObjectsOptions,
    ) -> BoxStream<'static, StorageResult<ObjectSummary>>;

    /// Reads object metadata
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the bucket or object is missing
    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMetadata>;

    /// Issues a presigned URL for `method` valid for `expiry`
    ///
    /// # Errors
    ///
    /// Returns `StorageError::SigningFailed` if the URL cannot be signed
    async fn sign_url(
        &self,
        method: SignedMethod,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> StorageResult<PresignedUrl>;
}
