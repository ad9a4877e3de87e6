//! Object key naming and access URL issuance
//!
//! Uploaded objects are namespaced by the UTC calendar day of the write
//! (`YYYYMMDD/<file name>`). Every successful write hands back two URLs:
//! a presigned GET URL that expires after the signing window, and a
//! permanent URL built from the public endpoint.
//!
//! The permanent URL only resolves if anonymous read access has been
//! granted on the bucket out-of-band. Nothing here sets or checks that
//! policy.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument};

use crate::object_storage::{ObjectStore, SignedMethod, StorageError, StorageResult, MAX_KEY_BYTES};

/// Validity window of the expiring URL handed out after a write
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(60 * 60);

/// Name used when the caller supplies a blank file name
pub const DEFAULT_FILE_NAME: &str = "99.jpg";

/// Where an object is (or will be) stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTarget {
    /// Destination bucket
    pub bucket_name: String,
    /// Date-prefixed object key
    pub object_key: String,
}

/// The two ways of reaching a stored object
#[derive(Debug, Clone)]
pub struct AccessDescriptor {
    /// Unsigned URL, valid only if the bucket allows anonymous reads
    pub permanent_url: String,
    /// Presigned GET URL
    pub expiring_url: String,
    /// Validity window of `expiring_url`
    pub expiry: Duration,
    /// When `expiring_url` was issued
    pub issued_at: DateTime<Utc>,
    /// `issued_at + expiry`
    pub expires_at: DateTime<Utc>,
}

/// Result of a completed upload
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    /// Where the object was written
    pub target: StorageTarget,
    /// URLs for reading it back
    pub access: AccessDescriptor,
}

/// Builds the date-namespaced key for `file_name`
#[must_use]
pub fn object_key_for(date: NaiveDate, file_name: &str) -> String {
    let file_name = if file_name.trim().is_empty() {
        DEFAULT_FILE_NAME
    } else {
        file_name
    };
    format!("{}/{file_name}", date.format("%Y%m%d"))
}

/// Derives storage keys and issues access URLs for writes
pub struct ObjectAccessResolver {
    object_store: Arc<dyn ObjectStore>,
    endpoint_base: String,
    signed_url_ttl: Duration,
}

impl ObjectAccessResolver {
    /// Creates a new resolver
    ///
    /// # Arguments
    ///
    /// * `object_store` - Backend the objects are written to
    /// * `endpoint_base` - Public address of the storage service, used for permanent URLs
    /// * `signed_url_ttl` - Validity window of expiring URLs (normally [`SIGNED_URL_TTL`])
    #[must_use]
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        endpoint_base: impl Into<String>,
        signed_url_ttl: Duration,
    ) -> Self {
        Self {
            object_store,
            endpoint_base: endpoint_base.into(),
            signed_url_ttl,
        }
    }

    /// Validity window of the expiring URLs this resolver issues
    #[must_use]
    pub const fn signed_url_ttl(&self) -> Duration {
        self.signed_url_ttl
    }

    /// Computes the storage key for today and makes sure the bucket exists
    ///
    /// Check-then-create is not atomic. Two first writers racing on a new
    /// bucket both see it missing and both create it; backends treat the
    /// second creation of an owned bucket as success.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidInput` if the resulting key is longer
    /// than [`MAX_KEY_BYTES`], or `StorageError::BackendUnavailable` if the
    /// existence check or the creation fails
    pub async fn resolve_and_prepare(
        &self,
        bucket_name: &str,
        file_name: &str,
    ) -> StorageResult<StorageTarget> {
        self.resolve_and_prepare_on(Utc::now().date_naive(), bucket_name, file_name)
            .await
    }

    async fn resolve_and_prepare_on(
        &self,
        date: NaiveDate,
        bucket_name: &str,
        file_name: &str,
    ) -> StorageResult<StorageTarget> {
        let object_key = object_key_for(date, file_name);
        if object_key.len() > MAX_KEY_BYTES {
            return Err(StorageError::InvalidInput(format!(
                "object key is {} bytes, the limit is {MAX_KEY_BYTES}",
                object_key.len()
            )));
        }

        if !self.object_store.bucket_exists(bucket_name).await? {
            info!(bucket = bucket_name, "Bucket missing, creating it");
            self.object_store.create_bucket(bucket_name).await?;
        }

        Ok(StorageTarget {
            bucket_name: bucket_name.to_string(),
            object_key,
        })
    }

    /// Issues an expiring and a permanent URL for a stored object
    ///
    /// # Errors
    ///
    /// Returns `StorageError::SigningFailed` if the backend cannot sign the URL
    pub async fn issue_access_descriptor(
        &self,
        bucket_name: &str,
        object_key: &str,
    ) -> StorageResult<AccessDescriptor> {
        let presigned = self
            .object_store
            .sign_url(
                SignedMethod::Get,
                bucket_name,
                object_key,
                self.signed_url_ttl,
            )
            .await?;

        let permanent_url = format!(
            "{}/{bucket_name}/{object_key}",
            self.endpoint_base.trim_end_matches('/')
        );

        debug!(bucket = bucket_name, key = object_key, %permanent_url, "Issued access URLs");

        Ok(AccessDescriptor {
            permanent_url,
            expiring_url: presigned.url,
            expiry: self.signed_url_ttl,
            issued_at: presigned.expires_at - self.signed_url_ttl,
            expires_at: presigned.expires_at,
        })
    }

    /// Writes `body` under today's key in `bucket_name` and returns its URLs
    ///
    /// # Errors
    ///
    /// Propagates any `StorageError` from preparing the bucket, writing the
    /// object or signing the URL
    #[instrument(skip(self, body), fields(size = body.len()))]
    pub async fn upload(
        &self,
        bucket_name: &str,
        file_name: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<UploadReceipt> {
        let target = self.resolve_and_prepare(bucket_name, file_name).await?;

        self.object_store
            .put_object(&target.bucket_name, &target.object_key, body, content_type)
            .await?;

        let access = self
            .issue_access_descriptor(&target.bucket_name, &target.object_key)
            .await?;

        info!(
            bucket = %target.bucket_name,
            key = %target.object_key,
            "Stored object"
        );

        Ok(UploadReceipt { target, access })
    }
}
