//! Error taxonomy for the pipeline.
//!
//! Configuration and validation errors are typed so callers (and the retry
//! loop) can tell them apart from transient external failures, which travel
//! as plain [`anyhow::Error`]s. "Not found" is never an error: lookups return
//! `Option`, searches return empty vectors.

use thiserror::Error;

use crate::vector_store::VectorStoreError;

/// Fatal misconfiguration. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("vector store is not initialized")]
    Uninitialized,

    #[error("vector store already initialized with {existing} dimensions, refusing {requested}")]
    DimensionMismatch { existing: usize, requested: usize },

    #[error("vector dimensionality must be > 0")]
    ZeroDimensions,

    #[error("stored vectors were produced by '{stored}' but the configured model is '{configured}'; purge and re-embed")]
    ModelMismatch { stored: String, configured: String },
}

/// Invalid input to a single operation. Surfaced to the immediate caller,
/// never coerced and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("vector length mismatch: expected {expected}, got {actual}")]
    VectorLength { expected: usize, actual: usize },

    #[error("embedding blob length {0} is not a multiple of 4")]
    BlobLength(usize),

    #[error("chunk threshold must be > 0")]
    ZeroThreshold,

    #[error("embedder returned {actual} vectors for {expected} inputs")]
    BatchLength { expected: usize, actual: usize },

    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// The language model's extraction output was not a JSON array of
    /// learnings. Unlike the other variants this one is worth retrying:
    /// sampling again usually produces valid output.
    #[error("malformed extraction output: {0}")]
    MalformedExtraction(String),
}

/// Returns true if `err` is a configuration or validation error, i.e. one
/// that retrying cannot fix.
pub fn is_permanent(err: &anyhow::Error) -> bool {
    if let Some(v) = err.downcast_ref::<ValidationError>() {
        return !matches!(v, ValidationError::MalformedExtraction(_));
    }
    err.downcast_ref::<ConfigError>().is_some() || err.downcast_ref::<VectorStoreError>().is_some()
}
