use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Multipart, Path, Query},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
        StatusCode,
    },
    response::Response,
    Extension, Json,
};
use axum_valid::Valid;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{info, instrument};
use validator::Validate;

use super::params::{BucketPath, ObjectPath};
use crate::{
    access_policy::{AccessDescriptor, ObjectAccessResolver},
    object_storage::{ListObjectsOptions, ObjectStore},
    types::AppError,
};

/// Largest accepted multipart upload body
pub const MAX_UPLOAD_SIZE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// Bucket the object was written to
    pub bucket: String,
    /// Date-prefixed key of the stored object
    pub object_key: String,
    /// Permanent URL, valid only if the bucket allows anonymous reads
    pub url: String,
    /// Presigned GET URL
    pub expiry_url: String,
    /// ISO-8601 UTC timestamp when `expiryUrl` expires
    pub expires_at: String,
    /// Validity window of `expiryUrl` in seconds
    pub expiry_secs: u64,
}

impl UploadResponse {
    fn new(bucket: String, object_key: String, access: AccessDescriptor) -> Self {
        Self {
            bucket,
            object_key,
            url: access.permanent_url,
            expiry_url: access.expiring_url,
            expires_at: access.expires_at.to_rfc3339(),
            expiry_secs: access.expiry.as_secs(),
        }
    }
}

struct UploadedFile {
    original_name: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

/// Upload a file
///
/// Accepts a multipart body with a `file` part and an optional `fileName`
/// text part. The object is stored under `YYYYMMDD/<name>` where the name is
/// `fileName` if given, else the uploaded file's own name. The bucket is
/// created if it does not exist yet.
///
/// # Errors
///
/// - `400 BAD_REQUEST` - Invalid bucket name, malformed body, no `file` part
///   or a file name that makes the key longer than 1024 bytes
/// - `413 PAYLOAD_TOO_LARGE` - Body larger than the upload limit
/// - `500 INTERNAL_SERVER_ERROR` - Presigned URL could not be issued
/// - `503 SERVICE_UNAVAILABLE` - Storage backend unreachable
#[instrument(skip(resolver, multipart))]
pub async fn upload_object(
    Extension(resolver): Extension<Arc<ObjectAccessResolver>>,
    Valid(Path(path)): Valid<Path<BucketPath>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut file = None;
    let mut requested_name = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name().map(str::to_owned).as_deref() {
            Some("file") => {
                let original_name = field.file_name().map(str::to_owned);
                let content_type = field.content_type().map(str::to_owned);
                let data = field.bytes().await?;
                file = Some(UploadedFile {
                    original_name,
                    content_type,
                    data,
                });
            }
            Some("fileName") => requested_name = Some(field.text().await?),
            _ => {}
        }
    }

    let Some(file) = file else {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "missing_file",
            "Multipart field `file` is required",
            false,
        ));
    };

    let file_name = requested_name
        .filter(|name| !name.trim().is_empty())
        .or(file.original_name)
        .unwrap_or_default();

    let receipt = resolver
        .upload(
            &path.bucket,
            &file_name,
            file.data,
            file.content_type.as_deref(),
        )
        .await?;

    Ok(Json(UploadResponse::new(
        receipt.target.bucket_name,
        receipt.target.object_key,
        receipt.access,
    )))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListObjectsQuery {
    /// Only list keys starting with this prefix
    pub prefix: Option<String>,
    /// List nested keys instead of collapsing them into directories (default: true)
    pub recursive: Option<bool>,
    /// Maximum number of entries to return
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEntry {
    /// Object key, or a common prefix for directory entries
    pub key: String,
    /// Size in bytes
    pub size: i64,
    /// ISO-8601 UTC time of the last modification
    pub last_modified: Option<String>,
    /// Entity tag
    pub etag: Option<String>,
    /// Whether the entry is a directory (non-recursive listings only)
    pub is_dir: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ListObjectsResponse {
    pub objects: Vec<ObjectEntry>,
}

/// List the objects of a bucket
///
/// # Errors
///
/// - `400 BAD_REQUEST` - Invalid bucket name
/// - `404 NOT_FOUND` - Bucket does not exist
/// - `503 SERVICE_UNAVAILABLE` - Storage backend unreachable
#[instrument(skip(object_store))]
pub async fn list_objects(
    Extension(object_store): Extension<Arc<dyn ObjectStore>>,
    Valid(Path(path)): Valid<Path<BucketPath>>,
    Query(query): Query<ListObjectsQuery>,
) -> Result<Json<ListObjectsResponse>, AppError> {
    let options = ListObjectsOptions {
        prefix: query.prefix,
        recursive: query.recursive.unwrap_or(true),
    };

    let objects: Vec<ObjectEntry> = object_store
        .list_objects(&path.bucket, options)
        .take(query.limit.unwrap_or(usize::MAX))
        .map_ok(|object| ObjectEntry {
            key: object.key,
            size: object.size,
            last_modified: object.last_modified.map(|date| date.to_rfc3339()),
            etag: object.etag,
            is_dir: object.is_dir,
        })
        .try_collect()
        .await?;

    Ok(Json(ListObjectsResponse { objects }))
}

/// Stream an object's content
///
/// # Errors
///
/// - `400 BAD_REQUEST` - Invalid bucket name or key
/// - `404 NOT_FOUND` - Bucket or object does not exist
/// - `503 SERVICE_UNAVAILABLE` - Storage backend unreachable
#[instrument(skip(object_store))]
pub async fn download_object(
    Extension(object_store): Extension<Arc<dyn ObjectStore>>,
    Valid(Path(path)): Valid<Path<ObjectPath>>,
) -> Result<Response, AppError> {
    let download = object_store.get_object(&path.bucket, &path.key).await?;

    let file_name = path
        .key
        .rsplit('/')
        .next()
        .unwrap_or(&path.key)
        .replace('"', "_");
    let content_type = download
        .content_type
        .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        );
    if let Some(content_length) = download.content_length {
        response = response.header(CONTENT_LENGTH, content_length);
    }

    let body = Body::from_stream(ReaderStream::new(download.body.into_async_read()));

    response.body(body).map_err(|e| {
        tracing::error!("Failed to build download response: {e}");
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal server error",
            false,
        )
    })
}

/// Delete an object
///
/// # Returns
///
/// Returns `204 NO_CONTENT` on success, including when the object did not exist
///
/// # Errors
///
/// - `400 BAD_REQUEST` - Invalid bucket name or key
/// - `404 NOT_FOUND` - Bucket does not exist
/// - `503 SERVICE_UNAVAILABLE` - Storage backend unreachable
#[instrument(skip(object_store))]
pub async fn delete_object(
    Extension(object_store): Extension<Arc<dyn ObjectStore>>,
    Valid(Path(path)): Valid<Path<ObjectPath>>,
) -> Result<StatusCode, AppError> {
    object_store.delete_object(&path.bucket, &path.key).await?;
    info!(bucket = %path.bucket, key = %path.key, "Deleted object");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadataResponse {
    pub bucket: String,
    pub key: String,
    /// Size in bytes
    pub size: i64,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    /// ISO-8601 UTC time of the last modification
    pub last_modified: Option<String>,
    /// User-defined metadata
    pub user_metadata: HashMap<String, String>,
}

/// Read an object's metadata
///
/// # Errors
///
/// - `400 BAD_REQUEST` - Invalid bucket name or key
/// - `404 NOT_FOUND` - Bucket or object does not exist
/// - `503 SERVICE_UNAVAILABLE` - Storage backend unreachable
#[instrument(skip(object_store))]
pub async fn stat_object(
    Extension(object_store): Extension<Arc<dyn ObjectStore>>,
    Valid(Path(path)): Valid<Path<ObjectPath>>,
) -> Result<Json<ObjectMetadataResponse>, AppError> {
    let metadata = object_store.stat_object(&path.bucket, &path.key).await?;

    Ok(Json(ObjectMetadataResponse {
        bucket: metadata.bucket,
        key: metadata.key,
        size: metadata.size,
        etag: metadata.etag,
        content_type: metadata.content_type,
        last_modified: metadata.last_modified.map(|date| date.to_rfc3339()),
        user_metadata: metadata.user_metadata,
    }))
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessUrlsResponse {
    /// Permanent URL, valid only if the bucket allows anonymous reads
    pub url: String,
    /// Presigned GET URL
    pub expiry_url: String,
    /// ISO-8601 UTC timestamp when `expiryUrl` expires
    pub expires_at: String,
    /// Validity window of `expiryUrl` in seconds
    pub expiry_secs: u64,
}

/// Issue access URLs for an existing object
///
/// # Errors
///
/// - `400 BAD_REQUEST` - Invalid bucket name or key
/// - `404 NOT_FOUND` - Bucket or object does not exist
/// - `500 INTERNAL_SERVER_ERROR` - Presigned URL could not be issued
/// - `503 SERVICE_UNAVAILABLE` - Storage backend unreachable
#[instrument(skip(object_store, resolver))]
pub async fn issue_access_urls(
    Extension(object_store): Extension<Arc<dyn ObjectStore>>,
    Extension(resolver): Extension<Arc<ObjectAccessResolver>>,
    Valid(Path(path)): Valid<Path<ObjectPath>>,
) -> Result<Json<AccessUrlsResponse>, AppError> {
    // Presigning never contacts the backend, so check existence first
    object_store.stat_object(&path.bucket, &path.key).await?;

    let access = resolver
        .issue_access_descriptor(&path.bucket, &path.key)
        .await?;

    Ok(Json(AccessUrlsResponse {
        url: access.permanent_url,
        expiry_url: access.expiring_url,
        expires_at: access.expires_at.to_rfc3339(),
        expiry_secs: access.expiry.as_secs(),
    }))
}

#[derive(Debug, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BatchDeleteRequest {
    /// Keys of the objects to delete
    #[validate(length(min = 1, max = 10000))]
    pub object_names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteErrorEntry {
    pub key: String,
    /// Backend error code, e.g. `AccessDenied`
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteResponse {
    /// Keys that were deleted
    pub deleted: Vec<String>,
    /// Keys that could not be deleted, with the reason
    pub errors: Vec<DeleteErrorEntry>,
}

/// Delete several objects
///
/// Failures are reported per key; one undeletable object does not fail
/// the rest of the batch.
///
/// # Errors
///
/// - `400 BAD_REQUEST` - Invalid bucket name or empty key list
/// - `404 NOT_FOUND` - Bucket does not exist
/// - `503 SERVICE_UNAVAILABLE` - Storage backend unreachable
#[instrument(skip(object_store, payload))]
pub async fn batch_delete(
    Extension(object_store): Extension<Arc<dyn ObjectStore>>,
    Valid(Path(path)): Valid<Path<BucketPath>>,
    Valid(Json(payload)): Valid<Json<BatchDeleteRequest>>,
) -> Result<Json<BatchDeleteResponse>, AppError> {
    let outcome = object_store
        .delete_objects(&path.bucket, &payload.object_names)
        .await?;

    info!(
        bucket = %path.bucket,
        deleted = outcome.deleted.len(),
        failed = outcome.failed.len(),
        "Batch delete finished"
    );

    Ok(Json(BatchDeleteResponse {
        deleted: outcome.deleted,
        errors: outcome
            .failed
            .into_iter()
            .map(|failure| DeleteErrorEntry {
                key: failure.key,
                code: failure.code,
                message: failure.message,
            })
            .collect(),
    }))
}
