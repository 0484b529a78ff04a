//! Error types for the Quiver library.
//!
//! All fallible operations return [`Result`], whose error type is the
//! [`QuiverError`] enum. Each variant carries a human-readable message and
//! maps to a stable machine code via [`QuiverError::code`], so callers (for
//! example an HTTP routing layer) can translate errors without string
//! matching.
//!
//! # Examples
//!
//! ```
//! use quiver::error::{QuiverError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(QuiverError::invalid_argument("k must be positive"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("success"),
//!     Err(e) => eprintln!("{} ({})", e, e.code()),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Quiver operations.
#[derive(Error, Debug)]
pub enum QuiverError {
    /// A referenced library, document, chunk, or snapshot does not exist.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Resource kind, e.g. `"library"`.
        resource: &'static str,
        /// The identifier that failed to resolve.
        id: String,
    },

    /// Name collision for a library or snapshot.
    #[error("{resource} already exists: {name}")]
    AlreadyExists {
        /// Resource kind, e.g. `"snapshot"`.
        resource: &'static str,
        /// The colliding name.
        name: String,
    },

    /// Embedding length disagrees with the established dimension.
    #[error("embedding dimensionality mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// The dimension the library or index was built with.
        expected: usize,
        /// The dimension of the offending vector.
        got: usize,
    },

    /// A vector is unusable under the requested metric (zero norm under
    /// cosine, or non-finite components).
    #[error("invalid vector: {0}")]
    InvalidVector(String),

    /// Algorithm/metric pairing not supported.
    #[error("{algorithm} does not support metric '{metric}'. Supported: {supported}")]
    UnsupportedMetric {
        /// The index algorithm name.
        algorithm: String,
        /// The rejected metric name.
        metric: String,
        /// Comma-separated list of metrics the algorithm accepts.
        supported: String,
    },

    /// Malformed caller input (k == 0, empty name, bad filter, bad config).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A snapshot file failed to parse or violates invariants on load.
    #[error("snapshot corrupt: {0}")]
    SnapshotCorrupt(String),

    /// The embedding credential is missing or the upstream failed
    /// non-retryably.
    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Invariant violation; should not occur.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O errors (snapshot files, directories).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error.
    #[error("error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with [`QuiverError`].
pub type Result<T> = std::result::Result<T, QuiverError>;

impl QuiverError {
    /// Create a new not-found error.
    pub fn not_found<S: Into<String>>(resource: &'static str, id: S) -> Self {
        QuiverError::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Create a new already-exists error.
    pub fn already_exists<S: Into<String>>(resource: &'static str, name: S) -> Self {
        QuiverError::AlreadyExists {
            resource,
            name: name.into(),
        }
    }

    /// Create a new dimension-mismatch error.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        QuiverError::DimensionMismatch { expected, got }
    }

    /// Create a new invalid-vector error.
    pub fn invalid_vector<S: Into<String>>(msg: S) -> Self {
        QuiverError::InvalidVector(msg.into())
    }

    /// Create a new unsupported-metric error.
    pub fn unsupported_metric(algorithm: &str, metric: &str, supported: &[&str]) -> Self {
        QuiverError::UnsupportedMetric {
            algorithm: algorithm.to_string(),
            metric: metric.to_string(),
            supported: supported.join(", "),
        }
    }

    /// Create a new invalid-argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        QuiverError::InvalidArgument(msg.into())
    }

    /// Create a new snapshot-corrupt error.
    pub fn snapshot_corrupt<S: Into<String>>(msg: S) -> Self {
        QuiverError::SnapshotCorrupt(msg.into())
    }

    /// Create a new embedding-unavailable error.
    pub fn embedding_unavailable<S: Into<String>>(msg: S) -> Self {
        QuiverError::EmbeddingUnavailable(msg.into())
    }

    /// Create a new internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        QuiverError::Internal(msg.into())
    }

    /// Stable machine code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            QuiverError::NotFound { .. } => "not_found",
            QuiverError::AlreadyExists { .. } => "already_exists",
            QuiverError::DimensionMismatch { .. } => "dimension_mismatch",
            QuiverError::InvalidVector(_) => "invalid_vector",
            QuiverError::UnsupportedMetric { .. } => "unsupported_metric",
            QuiverError::InvalidArgument(_) => "invalid_argument",
            QuiverError::SnapshotCorrupt(_) => "snapshot_corrupt",
            QuiverError::EmbeddingUnavailable(_) => "embedding_unavailable",
            QuiverError::Internal(_)
            | QuiverError::Io(_)
            | QuiverError::Json(_)
            | QuiverError::Anyhow(_) => "internal",
        }
    }
}
