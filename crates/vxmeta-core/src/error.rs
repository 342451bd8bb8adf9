use thiserror::Error;

use crate::query::QueryShape;

/// Errors produced while reconciling and aggregating metadata.
///
/// Configuration and connection variants are fatal for a run. Query, decode
/// and missing-aggregate variants are recoverable at model or deletion
/// granularity and only escalate under [`ErrorPolicy::FailFast`](crate::ErrorPolicy).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Query timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Row {row} cannot be decoded as {expected}: {found}")]
    Decode {
        row: usize,
        expected: QueryShape,
        found: String,
    },

    #[error("Expected a {expected} result, got {actual}")]
    ShapeMismatch {
        expected: QueryShape,
        actual: QueryShape,
    },

    #[error("Aggregate '{aggregate}' returned no usable row")]
    MissingAggregate { aggregate: &'static str },

    #[error("Field '{field}' has an unexpected value: {found}")]
    InvalidField { field: String, found: String },

    #[error("Template '{0}' is not loaded")]
    UnknownTemplate(String),

    #[error("None of {required} required model(s) could be aggregated: {first}")]
    NoModelsAggregated { required: usize, first: String },

    #[error("{failed} of {total} metadata pass(es) failed, {degraded} degraded")]
    RunFailed {
        failed: usize,
        total: usize,
        degraded: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

impl AppError {
    /// Whether this error must abort the whole run rather than a single model.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Config(_) | AppError::Connection(_))
    }
}
