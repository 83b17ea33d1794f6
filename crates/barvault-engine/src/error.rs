//! Engine error types.

use barvault_core::ValidationError;
use barvault_store::StoreError;
use thiserror::Error;

/// Errors surfaced by ingestion, reconciliation, and indicator computation.
///
/// Transient connector failures never appear here: they are absorbed into
/// retry loops and reported as partial availability on the ensure report.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An indicator parameter violated its bound. Rejected synchronously,
    /// before any series is resolved.
    #[error("invalid parameter '{parameter}'={value} for {indicator}: {bound}")]
    InvalidParameter {
        indicator: String,
        parameter: String,
        value: f64,
        bound: String,
    },

    /// The authoritative reference source could not be reached; the run is
    /// deferred and retried on the next schedule, never partially applied.
    #[error("reconciliation reference source unavailable: {message}")]
    ReconciliationSourceUnavailable { message: String },
}

impl EngineError {
    pub fn invalid_parameter(
        indicator: impl Into<String>,
        parameter: impl Into<String>,
        value: f64,
        bound: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            indicator: indicator.into(),
            parameter: parameter.into(),
            value,
            bound: bound.into(),
        }
    }

    pub fn reference_unavailable(message: impl Into<String>) -> Self {
        Self::ReconciliationSourceUnavailable {
            message: message.into(),
        }
    }
}
