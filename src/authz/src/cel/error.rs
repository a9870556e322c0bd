//! Error types for CEL operations

use thiserror::Error;

/// CEL operation errors
#[derive(Error, Debug)]
pub enum CelError {
    #[error("CEL compilation failed: {0}")]
    CompilationError(String),

    #[error("CEL evaluation failed: {0}")]
    EvaluationError(String),

    #[error("Expression did not return boolean result")]
    NonBooleanResult,
}

/// Result type for CEL operations
pub type Result<T> = std::result::Result<T, CelError>;

impl From<CelError> for crate::error::AuthzError {
    fn from(err: CelError) -> Self {
        match err {
            CelError::CompilationError(_) => crate::error::AuthzError::InvalidPolicy(err.to_string()),
            other => crate::error::AuthzError::Evaluation(other.to_string()),
        }
    }
}
