//! Store error types.

/// Errors surfaced by store operations. A mutation that returns an error
/// commits nothing.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique index violation on {table}.{index}")]
    UniqueViolation {
        table: &'static str,
        index: &'static str,
    },
    #[error("referenced document {id} does not exist in {table}")]
    MissingReference { table: &'static str, id: String },
    #[error("document {id} not found in {table}")]
    NotFound { table: &'static str, id: String },
    #[error("invalid status transition on {table}: {from} -> {to}")]
    InvalidTransition {
        table: &'static str,
        from: String,
        to: String,
    },
    #[error("conflict: {0}")]
    Conflict(String),
}
