mod buckets;
mod objects;
mod params;

pub use objects::MAX_UPLOAD_SIZE_BYTES;

use aide::axum::{
    routing::{delete, get, post},
    ApiRouter,
};

/// Creates the v1 API router with all bucket and object routes
pub fn handler() -> ApiRouter {
    ApiRouter::new()
        .api_route("/buckets", get(buckets::list_buckets))
        .api_route(
            "/buckets/{bucket}/objects",
            get(objects::list_objects).post(objects::upload_object),
        )
        .api_route(
            "/buckets/{bucket}/objects/{*key}",
            delete(objects::delete_object),
        )
        .api_route(
            "/buckets/{bucket}/metadata/{*key}",
            get(objects::stat_object),
        )
        .api_route(
            "/buckets/{bucket}/access-urls/{*key}",
            get(objects::issue_access_urls),
        )
        .api_route(
            "/buckets/{bucket}/batch-delete",
            post(objects::batch_delete),
        )
        // Streamed bodies have no schema, so downloads stay out of the OpenAPI document
        .route(
            "/buckets/{bucket}/downloads/{*key}",
            axum::routing::get(objects::download_object),
        )
}
