use std::{sync::Arc, time::Duration};

use axum::{body::Body, http::Request, response::Response, Router};
use gateway::{
    access_policy::{ObjectAccessResolver, SIGNED_URL_TTL},
    object_storage::{InMemoryObjectStore, ObjectStore},
    server,
    types::Environment,
};
use tower::ServiceExt;

use super::utils::MultipartBody;

/// Public address used for permanent URLs in tests
pub const TEST_ENDPOINT: &str = "http://localhost:9000";

/// Setup test environment variables with all the required configuration
pub fn setup_test_env() {
    // Load test environment variables
    dotenvy::from_path(".env.example").ok();

    // Initialize tracing for tests
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init()
        .ok();
}

/// Router wired to an in-memory storage backend
pub struct TestSetup {
    pub router: Router,
    pub environment: Environment,
    pub object_store: Arc<InMemoryObjectStore>,
}

impl TestSetup {
    pub fn new() -> Self {
        Self::with_ttl(SIGNED_URL_TTL)
    }

    pub fn with_ttl(signed_url_ttl: Duration) -> Self {
        setup_test_env();

        let environment = Environment::Development {
            signed_url_expiry_override: None,
        };

        let object_store = Arc::new(InMemoryObjectStore::new());
        let dyn_store: Arc<dyn ObjectStore> = object_store.clone();
        let access_resolver = Arc::new(ObjectAccessResolver::new(
            dyn_store.clone(),
            TEST_ENDPOINT,
            signed_url_ttl,
        ));

        let router = server::router(environment.clone(), dyn_store, access_resolver);

        Self {
            router,
            environment,
            object_store,
        }
    }

    /// Creates `bucket` and stores each key with its own name as content
    pub async fn seed(&self, bucket: &str, keys: &[&str]) {
        self.object_store
            .create_bucket(bucket)
            .await
            .expect("Failed to create bucket");
        for key in keys {
            self.object_store
                .put_object(
                    bucket,
                    key,
                    key.as_bytes().to_vec().into(),
                    Some("text/plain"),
                )
                .await
                .expect("Failed to seed object");
        }
    }

    pub async fn send_post_request(
        &self,
        route: &str,
        payload: serde_json::Value,
    ) -> Result<Response, Box<dyn std::error::Error>> {
        let request = Request::builder()
            .uri(route)
            .method("POST")
            .header("Content-Type", "application/json")
            .body(Body::from(payload.to_string()))?;

        let response = self.router.clone().oneshot(request).await?;
        Ok(response)
    }

    pub async fn send_multipart_request(
        &self,
        route: &str,
        body: MultipartBody,
    ) -> Result<Response, Box<dyn std::error::Error>> {
        let request = Request::builder()
            .uri(route)
            .method("POST")
            .header("Content-Type", body.content_type())
            .body(Body::from(body.finish()))?;

        let response = self.router.clone().oneshot(request).await?;
        Ok(response)
    }

    pub async fn send_get_request(
        &self,
        route: &str,
    ) -> Result<Response, Box<dyn std::error::Error>> {
        let request = Request::builder()
            .uri(route)
            .method("GET")
            .body(Body::empty())?;
        let response = self.router.clone().oneshot(request).await?;
        Ok(response)
    }

    pub async fn send_delete_request(
        &self,
        route: &str,
    ) -> Result<Response, Box<dyn std::error::Error>> {
        let request = Request::builder()
            .uri(route)
            .method("DELETE")
            .body(Body::empty())?;
        let response = self.router.clone().oneshot(request).await?;
        Ok(response)
    }
}
