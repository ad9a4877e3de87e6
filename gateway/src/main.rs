use std::{sync::Arc, time::Duration};

use aws_sdk_s3::Client as S3Client;

use gateway::{
    access_policy::ObjectAccessResolver,
    object_storage::{ObjectStore, S3ObjectStore},
    server,
    types::Environment,
};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let environment = Environment::from_env();

    // JSON logs for staging/production, human-readable for development
    match environment {
        Environment::Production | Environment::Staging => {
            fmt()
                .json()
                .with_env_filter(EnvFilter::from_default_env())
                .init();
        }
        Environment::Development { .. } => {
            fmt().with_env_filter(EnvFilter::from_default_env()).init();
        }
    }

    let s3_client = Arc::new(S3Client::from_conf(environment.s3_client_config().await));
    let object_store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(s3_client));
    let access_resolver = Arc::new(ObjectAccessResolver::new(
        object_store.clone(),
        environment.public_endpoint_base(),
        Duration::from_secs(environment.signed_url_expiry_secs()),
    ));

    server::start(environment, object_store, access_resolver).await
}
