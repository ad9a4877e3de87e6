use std::sync::Arc;

use axum::{Extension, Json};
use schemars::JsonSchema;
use serde::Serialize;
use tracing::instrument;

use crate::{object_storage::ObjectStore, types::AppError};

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketEntry {
    /// Bucket name
    pub name: String,
    /// ISO-8601 UTC creation time, when the backend reports one
    pub creation_date: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListBucketsResponse {
    pub buckets: Vec<BucketEntry>,
}

/// List all buckets
///
/// # Errors
///
/// - `503 SERVICE_UNAVAILABLE` - Storage backend unreachable
#[instrument(skip(object_store))]
pub async fn list_buckets(
    Extension(object_store): Extension<Arc<dyn ObjectStore>>,
) -> Result<Json<ListBucketsResponse>, AppError> {
    let buckets = object_store
        .list_buckets()
        .await?
        .into_iter()
        .map(|bucket| BucketEntry {
            name: bucket.name,
            creation_date: bucket.creation_date.map(|date| date.to_rfc3339()),
        })
        .collect();

    Ok(Json(ListBucketsResponse { buckets }))
}
