//! Error types for condition construction and evaluation.

/// Errors raised while building or evaluating alert conditions.
///
/// `Validation` is the only construction-time variant: a rule whose
/// conditions fail to build is misconfigured and never evaluated. Every
/// other variant is an execution failure recorded on the evaluation result.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// Malformed condition definition (unknown type, wrong arity, bad range).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Datasource lookup failed.
    #[error("could not find datasource {id}: {message}")]
    DatasourceNotFound { id: i64, message: String },

    /// The query handler returned an error.
    #[error("query handler error: {0}")]
    Query(String),

    /// A result inside the response carried an error.
    #[error("query response error for {ref_id}: {message}")]
    Response { ref_id: String, message: String },

    /// Columnar data could not be turned into series.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// The query dispatch exceeded the evaluation deadline.
    #[error("alert execution exceeded the timeout")]
    Timeout,

    /// The caller cancelled the evaluation.
    #[error("alert execution was cancelled")]
    Cancelled,
}

impl AlertError {
    /// True for construction errors ("rule misconfigured").
    pub fn is_validation(&self) -> bool {
        matches!(self, AlertError::Validation(_))
    }
}

impl From<vigil_core::VigilError> for AlertError {
    fn from(e: vigil_core::VigilError) -> Self {
        match e {
            vigil_core::VigilError::Conversion(msg) => AlertError::Conversion(msg),
            vigil_core::VigilError::Config(msg) => AlertError::Validation(msg),
            other => AlertError::Query(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AlertError {
    fn from(e: serde_json::Error) -> Self {
        AlertError::Validation(format!("malformed condition JSON: {e}"))
    }
}

/// Result alias for alerting operations.
pub type Result<T> = std::result::Result<T, AlertError>;
