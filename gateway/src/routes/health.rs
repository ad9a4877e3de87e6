use aide::axum::IntoApiResponse;
use axum::Json;
use schemars::JsonSchema;
use serde::Serialize;

#[derive(Debug, Serialize, JsonSchema)]
pub struct HealthResponse {
    status: &'static str,
    /// Name of the service
    service: &'static str,
    /// Crate version
    semver: &'static str,
    /// Commit hash of the build, if known
    rev: Option<&'static str>,
}

/// Health check endpoint
///
/// Liveness only; the storage backend is not contacted.
pub async fn handler() -> impl IntoApiResponse {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        semver: env!("CARGO_PKG_VERSION"),
        rev: option_env!("GIT_REV"),
    })
}
