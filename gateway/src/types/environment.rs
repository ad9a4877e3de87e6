//! Environment configuration for different deployment stages

use std::env;
use std::time::Duration;

use aws_config::{retry::RetryConfig, timeout::TimeoutConfig, BehaviorVersion, Region};

use crate::access_policy::SIGNED_URL_TTL;

/// Local `MinIO` started by `docker compose`
const DEVELOPMENT_ENDPOINT: &str = "http://localhost:9000";

/// Region used when neither the environment nor the profile sets one
const FALLBACK_REGION: &str = "us-east-1";

/// Application environment configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    /// Production environment
    Production,
    /// Staging environment
    Staging,
    /// Development environment (uses a local `MinIO`)
    Development {
        /// Optional override for signed URL expiry in seconds
        signed_url_expiry_override: Option<u64>,
    },
}

impl Environment {
    /// Creates an Environment from the `APP_ENV` environment variable
    ///
    /// # Panics
    ///
    /// Panics if `APP_ENV` contains an invalid value
    #[must_use]
    pub fn from_env() -> Self {
        let env = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .trim()
            .to_lowercase();

        match env.as_str() {
            "production" => Self::Production,
            "staging" => Self::Staging,
            "development" => {
                let signed_url_expiry_override = env::var("SIGNED_URL_EXPIRY_SECS")
                    .ok()
                    .and_then(|val| val.parse::<u64>().ok());

                Self::Development {
                    signed_url_expiry_override,
                }
            }
            _ => panic!("Invalid environment: {env}"),
        }
    }

    /// Whether to show API docs
    #[must_use]
    pub const fn show_api_docs(&self) -> bool {
        matches!(self, Self::Development { .. } | Self::Staging)
    }

    /// Returns the endpoint URL of the S3-compatible service, if not AWS itself
    #[must_use]
    pub fn s3_endpoint_url(&self) -> Option<String> {
        let configured = env::var("S3_ENDPOINT_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        match self {
            Self::Production | Self::Staging => configured,
            Self::Development { .. } => {
                Some(configured.unwrap_or_else(|| DEVELOPMENT_ENDPOINT.to_string()))
            }
        }
    }

    /// Base address used to build permanent object URLs
    ///
    /// # Panics
    ///
    /// Panics in production and staging if neither `S3_PUBLIC_ENDPOINT` nor
    /// `S3_ENDPOINT_URL` is set
    #[must_use]
    pub fn public_endpoint_base(&self) -> String {
        env::var("S3_PUBLIC_ENDPOINT")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.s3_endpoint_url())
            .expect("S3_PUBLIC_ENDPOINT environment variable is not set")
    }

    /// AWS configuration with retry and timeout settings
    pub async fn aws_config(&self) -> aws_config::SdkConfig {
        let retry_config = RetryConfig::standard()
            .with_max_attempts(3)
            .with_initial_backoff(Duration::from_millis(50));

        let timeout_config = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(30))
            .build();

        let loaded = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let needs_region = loaded.region().is_none();

        let mut config_builder = loaded
            .to_builder()
            .retry_config(retry_config)
            .timeout_config(timeout_config);

        if needs_region {
            config_builder = config_builder.region(Region::new(FALLBACK_REGION));
        }

        if let Some(endpoint_url) = self.s3_endpoint_url() {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }

        config_builder.build()
    }

    /// AWS S3 service configuration
    pub async fn s3_client_config(&self) -> aws_sdk_s3::Config {
        let aws_config = self.aws_config().await;
        let s3_config: aws_sdk_s3::Config = (&aws_config).into();
        let mut builder = s3_config.to_builder();

        // MinIO and LocalStack only serve path-style requests
        // https://github.com/awslabs/aws-sdk-rust/discussions/874
        if self.s3_endpoint_url().is_some() {
            builder.set_force_path_style(Some(true));
        }

        builder.build()
    }

    /// Signed URL expiry time in seconds
    #[must_use]
    pub const fn signed_url_expiry_secs(&self) -> u64 {
        match self {
            Self::Production | Self::Staging => SIGNED_URL_TTL.as_secs(),
            Self::Development {
                signed_url_expiry_override,
            } => match signed_url_expiry_override {
                Some(secs) => *secs,
                None => SIGNED_URL_TTL.as_secs(),
            },
        }
    }
}
