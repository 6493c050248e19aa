use thiserror::Error;

/// Errors from execution store operations (used by the store trait in
/// flowforge-core).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend unavailable: {0}")]
    Unavailable(String),

    #[error("execution not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors loading a workflow definition document.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to read workflow file '{path}': {reason}")]
    Io { path: String, reason: String },

    #[error("invalid workflow definition: {0}")]
    Parse(String),

    #[error("unsupported workflow file extension: '{0}'")]
    UnsupportedFormat(String),
}
