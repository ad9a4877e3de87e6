mod docs;
mod health;
mod v1;

pub use v1::MAX_UPLOAD_SIZE_BYTES;

use aide::axum::{routing::get, ApiRouter};

/// Creates the router with all handler routes
pub fn handler() -> ApiRouter {
    ApiRouter::new()
        .merge(docs::handler())
        .api_route("/health", get(health::handler))
        .nest("/v1", v1::handler())
}
