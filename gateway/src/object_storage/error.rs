//! Error types for object storage operations

use aws_sdk_s3::{
    config::http::HttpResponse,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
};
use thiserror::Error;

/// Result type for object storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while talking to the storage backend
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend unreachable, credentials rejected or a 5xx from the service
    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Bucket or object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Presigned URL could not be issued
    #[error("URL signing failed: {0}")]
    SigningFailed(String),

    /// Request the backend or the SDK rejects as malformed
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

const NOT_FOUND_CODES: [&str; 3] = ["NoSuchBucket", "NoSuchKey", "NotFound"];

/// Maps an SDK failure onto the storage taxonomy.
///
/// A 404 status or one of the S3 "no such ..." codes becomes `NotFound`.
/// Other 4xx answers are client mistakes and become `InvalidInput`, except
/// 401/403 which mean our credentials are wrong. Transport failures, 5xx
/// and credential problems are treated as the backend being unavailable.
pub(crate) fn classify_sdk_error<E>(err: SdkError<E, HttpResponse>, context: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|raw| raw.status().as_u16());
    let code_is_not_found = err
        .code()
        .is_some_and(|code| NOT_FOUND_CODES.contains(&code));

    if status == Some(404) || code_is_not_found {
        return StorageError::NotFound(context.to_string());
    }

    let detail = format!("{context}: {}", DisplayErrorContext(&err));
    let rejected_request = matches!(status, Some(400..=499)) && !matches!(status, Some(401 | 403));

    if rejected_request {
        StorageError::InvalidInput(detail)
    } else {
        StorageError::BackendUnavailable(detail)
    }
}
