//! Store error types.

use barvault_core::ValidationError;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the version store, snapshot manager, and retention.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// The requested version tag does not exist for this key. Callers are
    /// expected to `ensure` before reading.
    #[error("version '{tag}' not found for {key}")]
    NotFound { key: String, tag: String },

    /// Attempted mutation of a sealed (immutable) version.
    #[error("version '{tag}' for {key} is sealed and cannot be mutated")]
    Conflict { key: String, tag: String },

    /// The snapshot id is unknown.
    #[error("snapshot {id} not found")]
    SnapshotNotFound { id: Uuid },

    /// A point's instrument or timeframe does not match the series key it was
    /// written under.
    #[error("point does not belong to series {key}")]
    MismatchedPoint { key: String },

    /// Stored content no longer matches its recorded hash. Fatal: surfaced to
    /// the operator, never silently repaired.
    #[error("integrity verification failed for {context}: expected {expected}, got {actual}")]
    IntegrityVerification {
        context: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl StoreError {
    pub fn not_found(key: impl ToString, tag: impl ToString) -> Self {
        Self::NotFound {
            key: key.to_string(),
            tag: tag.to_string(),
        }
    }

    pub fn conflict(key: impl ToString, tag: impl ToString) -> Self {
        Self::Conflict {
            key: key.to_string(),
            tag: tag.to_string(),
        }
    }

    /// Whether this error is fatal and must reach an operator.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::IntegrityVerification { .. })
    }
}
