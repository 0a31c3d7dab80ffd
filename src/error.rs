//! Error taxonomy for the ingestion pipeline.
//!
//! Mapping errors are per-document and never fatal. Feed and storage errors
//! are surfaced to whoever owns the subscription so it can decide on restart.
//! Duplicates are not errors; they show up as `skipped` in
//! [`IngestionResult`](crate::models::IngestionResult).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("required field `{0}` is missing")]
    MissingField(&'static str),
    #[error("field `{field}` is not a valid number: {value}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("field `{0}` must be greater than zero")]
    NonPositive(&'static str),
}

/// Subscription-level failure reported by the feed client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("not authorized to read collection: {0}")]
    Unauthorized(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("subscription closed by the feed")]
    Closed,
    #[error("feed error: {0}")]
    Other(String),
}

/// Failure writing to or reading from the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage backend disconnected")]
    Disconnected,
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("storage failure: {0}")]
    Backend(String),
    /// The batch was rolled back because its caller cancelled it before commit.
    #[error("insert cancelled before commit")]
    Cancelled,
}

impl StorageError {
    /// Recovers a typed error raised inside the database actor, or wraps the
    /// rendered chain as a backend failure.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<StorageError>() {
            Ok(typed) => typed,
            Err(other) => StorageError::Backend(format!("{other:#}")),
        }
    }
}
