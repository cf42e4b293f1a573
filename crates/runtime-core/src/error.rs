//! Error types for the model synchronization engine

use thiserror::Error;

/// Result type alias using the runtime Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the model synchronization engine
#[derive(Error, Debug)]
pub enum Error {
    // Transport errors
    #[error("Tensor store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Tensor store request failed: {message}")]
    Transport { message: String },

    #[error("Tensor not found: {key}")]
    TensorNotFound { key: String },

    #[error("No pending response in the pipeline ({queued} command(s) still unflushed)")]
    PipelineEmpty { queued: usize },

    // Decode errors
    #[error("Unsupported datatype for tensor: {dtype}")]
    UnsupportedDType { dtype: String },

    #[error("Malformed tensor {key}: {reason}")]
    MalformedTensor { key: String, reason: String },

    // Merge errors
    #[error("Shape mismatch for layer {layer}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        layer: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Datatype mismatch for layer {layer}: expected {expected}, got {actual}")]
    DTypeMismatch {
        layer: String,
        expected: String,
        actual: String,
    },

    // Transaction errors
    #[error("Transaction failed: {message}")]
    TransactionFailed { message: String },

    // Model errors
    #[error("Model for job {job_id} has no layer names")]
    EmptySchema { job_id: String },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Job already exists: {job_id}")]
    JobAlreadyExists { job_id: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Store unreachable or a request failed
    Transport,

    /// Unsupported datatype, malformed shape or blob
    Decode,

    /// Attempted merge of incompatible tensors
    ShapeMismatch,

    /// Commit failed
    Transaction,

    /// Misuse of a model or the job registry
    Model,

    /// Bad configuration
    Config,

    /// Anything else
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::StoreUnavailable { .. }
            | Error::Transport { .. }
            | Error::TensorNotFound { .. }
            | Error::PipelineEmpty { .. }
            | Error::Io(_) => ErrorKind::Transport,
            Error::UnsupportedDType { .. } | Error::MalformedTensor { .. } => ErrorKind::Decode,
            Error::ShapeMismatch { .. } | Error::DTypeMismatch { .. } => ErrorKind::ShapeMismatch,
            Error::TransactionFailed { .. } => ErrorKind::Transaction,
            Error::EmptySchema { .. }
            | Error::JobNotFound { .. }
            | Error::JobAlreadyExists { .. } => ErrorKind::Model,
            Error::InvalidConfig { .. } => ErrorKind::Config,
            Error::Serialization(_) | Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if re-invoking the failed call may succeed.
    ///
    /// Nothing in this workspace retries; this is a hint for the caller
    /// deciding whether to resubmit a contribution.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable { .. } | Error::Transport { .. } | Error::Io(_)
        )
    }

    /// Returns true if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::EmptySchema { .. } | Error::InvalidConfig { .. } | Error::Internal { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        let err = Error::UnsupportedDType {
            dtype: "BOOL".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Decode);

        let err = Error::ShapeMismatch {
            layer: "fc1.weight".to_string(),
            expected: vec![4],
            actual: vec![2, 2],
        };
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);

        let err = Error::TransactionFailed {
            message: "commit without begin".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Transaction);
    }

    #[test]
    fn test_error_retryable() {
        let err = Error::StoreUnavailable {
            message: "connection refused".to_string(),
        };
        assert!(err.is_retryable());

        let err = Error::ShapeMismatch {
            layer: "fc1.weight".to_string(),
            expected: vec![4],
            actual: vec![3],
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_fatal() {
        let err = Error::InvalidConfig {
            message: "empty base path".to_string(),
        };
        assert!(err.is_fatal());

        let err = Error::TensorNotFound {
            key: "job.fc1.weight".to_string(),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = Error::ShapeMismatch {
            layer: "fc1.weight".to_string(),
            expected: vec![4],
            actual: vec![2, 2],
        };
        assert_eq!(
            err.to_string(),
            "Shape mismatch for layer fc1.weight: expected [4], got [2, 2]"
        );
    }
}
