//! Object Gateway service

#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    dead_code
)]

/// Object key resolution and access URL issuance
pub mod access_policy;

/// Storage backend abstraction and its S3 implementation
pub mod object_storage;

/// HTTP routes
pub mod routes;

/// Server startup and shutdown
pub mod server;

/// Environment configuration and API error types
pub mod types;
