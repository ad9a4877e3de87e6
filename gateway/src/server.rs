use std::{sync::Arc, time::Duration};

use aide::openapi::OpenApi;
use axum::{extract::DefaultBodyLimit, Extension};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    access_policy::ObjectAccessResolver,
    object_storage::ObjectStore,
    routes::{self, MAX_UPLOAD_SIZE_BYTES},
    types::Environment,
};

/// Upper bound for a single request, uploads included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the application router with all extensions and middleware layers
#[must_use]
pub fn router(
    environment: Environment,
    object_store: Arc<dyn ObjectStore>,
    access_resolver: Arc<ObjectAccessResolver>,
) -> axum::Router {
    let mut openapi = OpenApi::default();

    routes::handler()
        .finish_api(&mut openapi)
        .layer(Extension(openapi))
        .layer(Extension(environment))
        .layer(Extension(object_store))
        .layer(Extension(access_resolver))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}

/// Starts the server with the given environment and dependencies
///
/// # Errors
///
/// Returns an error if the server fails to start or bind to the port
pub async fn start(
    environment: Environment,
    object_store: Arc<dyn ObjectStore>,
    access_resolver: Arc<ObjectAccessResolver>,
) -> anyhow::Result<()> {
    let router = router(environment, object_store, access_resolver);

    let addr = std::net::SocketAddr::from((
        [0, 0, 0, 0],
        std::env::var("PORT").map_or(Ok(8001), |p| p.parse())?,
    ));

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("🔄 Object Gateway started on http://{addr}");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(anyhow::Error::from)
}

/// Resolves once SIGINT or SIGTERM is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
