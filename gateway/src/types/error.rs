//! Universal error handling for the API

use aide::OperationOutput;
use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use schemars::JsonSchema;
use serde::Serialize;

use crate::object_storage::StorageError;

/// API error response envelope
#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    /// Whether the client should retry the request
    pub allow_retry: bool,
    /// Error details
    error: ErrorBody,
}

/// Error body containing code and message
#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    /// Machine-readable error code
    pub code: &'static str,
    /// Human-readable error message
    pub message: &'static str,
}

/// Application error type that wraps the API error response
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    inner: ApiErrorResponse,
}

impl AppError {
    /// Create a new application error
    #[must_use]
    pub const fn new(
        status: StatusCode,
        code: &'static str,
        msg: &'static str,
        retry: bool,
    ) -> Self {
        Self {
            status,
            inner: ApiErrorResponse {
                allow_retry: retry,
                error: ErrorBody { code, message: msg },
            },
        }
    }

    /// HTTP status of the error
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.inner.error.code
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the error based on status code
        match self.status.as_u16() {
            400..=499 => tracing::warn!(
                "Client error: {} - {}",
                self.inner.error.code,
                self.inner.error.message
            ),
            500..=599 => tracing::error!(
                "Server error: {} - {}",
                self.inner.error.code,
                self.inner.error.message
            ),
            _ => {}
        }

        (self.status, Json(self.inner)).into_response()
    }
}

/// Convert storage errors to application errors
impl From<StorageError> for AppError {
    #[allow(clippy::cognitive_complexity)]
    fn from(err: StorageError) -> Self {
        use StorageError::{BackendUnavailable, InvalidInput, NotFound, SigningFailed};

        match &err {
            NotFound(what) => {
                tracing::debug!("Not found: {what}");
                Self::new(
                    StatusCode::NOT_FOUND,
                    "not_found",
                    "Bucket or object not found",
                    false,
                )
            }
            BackendUnavailable(msg) => {
                tracing::error!("Storage backend error: {msg}");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "backend_unavailable",
                    "Storage service temporarily unavailable",
                    true,
                )
            }
            SigningFailed(msg) => {
                tracing::error!("Signing error: {msg}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "signing_failed",
                    "Could not issue access URL",
                    false,
                )
            }
            InvalidInput(msg) => {
                tracing::warn!("Invalid input: {msg}");
                Self::new(
                    StatusCode::BAD_REQUEST,
                    "invalid_input",
                    "Invalid input provided",
                    false,
                )
            }
        }
    }
}

/// Convert multipart parsing errors to application errors
impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        tracing::warn!("Multipart error: {err}");
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                "Upload exceeds the maximum size",
                false,
            )
        } else {
            Self::new(
                StatusCode::BAD_REQUEST,
                "invalid_multipart",
                "Malformed multipart body",
                false,
            )
        }
    }
}

impl OperationOutput for AppError {
    type Inner = ApiErrorResponse;

    fn operation_response(
        ctx: &mut aide::generate::GenContext,
        operation: &mut aide::openapi::Operation,
    ) -> Option<aide::openapi::Response> {
        Json::<ApiErrorResponse>::operation_response(ctx, operation)
    }
}
