use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::object_storage::MAX_KEY_BYTES;

static BUCKET_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").expect("Invalid regex"));

/// S3 bucket naming rules: 3-63 characters, lowercase letters, digits,
/// dots and hyphens, starting and ending with a letter or digit
fn validate_bucket_name(bucket: &str) -> Result<(), ValidationError> {
    if BUCKET_NAME_REGEX.is_match(bucket) && !bucket.contains("..") {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_bucket_name"))
    }
}

/// S3 limits keys by their UTF-8 length, not their character count
fn validate_object_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() || key.len() > MAX_KEY_BYTES {
        Err(ValidationError::new("invalid_object_key"))
    } else {
        Ok(())
    }
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct BucketPath {
    /// Bucket name
    #[validate(custom(function = "validate_bucket_name"))]
    pub bucket: String,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct ObjectPath {
    /// Bucket name
    #[validate(custom(function = "validate_bucket_name"))]
    pub bucket: String,
    /// Full object key, e.g. `20240501/cat.png`
    #[validate(custom(function = "validate_object_key"))]
    pub key: String,
}
