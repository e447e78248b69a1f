//! Error types shared across the indexing and retrieval pipeline.
//!
//! Every failure carries a machine-readable kind (stable, part of the
//! public contract) next to the human-readable message. The binary maps
//! kinds onto process exit codes via [`RagError::exit_code`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Malformed file path, unreadable file, or invalid options.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A non-forcing index of a document that is already in the store.
    #[error("document already indexed: {0} (pass force to reindex)")]
    AlreadyIndexed(String),

    /// Structural contradiction detected in a chunk tree. Never retried,
    /// never silently corrected.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Persistence backend failed or is unreachable. Retryable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Embedding client failed after per-item fallback. Retryable.
    #[error("embedding failure: {0}")]
    EmbeddingFailure(String),

    /// Deadline expired or the operation was cancelled.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl RagError {
    /// Stable machine-readable kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::InvalidInput(_) => "invalid_input",
            RagError::AlreadyIndexed(_) => "already_indexed",
            RagError::InvariantViolation(_) => "invariant_violation",
            RagError::StoreUnavailable(_) => "store_unavailable",
            RagError::EmbeddingFailure(_) => "embedding_failure",
            RagError::Cancelled(_) => "cancelled",
        }
    }

    /// Whether the caller may retry the failed operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::StoreUnavailable(_) | RagError::EmbeddingFailure(_)
        )
    }

    /// Process exit code for the `lex` binary: 0 success, 2 invariant
    /// violation, 3 I/O or store error, 4 cancelled.
    pub fn exit_code(&self) -> i32 {
        match self {
            RagError::InvariantViolation(_) => 2,
            RagError::Cancelled(_) => 4,
            _ => 3,
        }
    }
}

impl From<sqlx::Error> for RagError {
    fn from(err: sqlx::Error) -> Self {
        RagError::StoreUnavailable(err.to_string())
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;

/// Fails with [`RagError::Cancelled`] once the optional deadline has passed.
/// Public operations call this between suspension points so cancellation
/// never leaves orphan writes behind.
pub fn check_deadline(deadline: Option<std::time::Instant>, operation: &str) -> Result<()> {
    match deadline {
        Some(d) if std::time::Instant::now() >= d => Err(RagError::Cancelled(format!(
            "{} exceeded its deadline",
            operation
        ))),
        _ => Ok(()),
    }
}
