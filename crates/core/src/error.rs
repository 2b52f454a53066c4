//! Error model for dynamic jobs.

use thiserror::Error;

/// Result type used when declaring, building, or registering jobs.
pub type DeclarationResult<T> = Result<T, DeclarationError>;

/// Result type used when replaying an envelope on a worker.
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Boxed error raised by a job method.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Argument codec failure.
///
/// Raised on the side where the mismatch is detected; values are never coerced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The static type has no transport encoding.
    #[error("unsupported argument type: {0}")]
    UnsupportedType(String),

    /// The value (or encoded value) does not match the static type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// NaN and infinities have no JSON representation.
    #[error("non-finite float cannot be encoded")]
    NonFinite,

    /// The encoded text is not valid for any value of the type.
    #[error("malformed encoded value: {0}")]
    Malformed(String),
}

impl CodecError {
    pub fn unsupported(type_name: impl Into<String>) -> Self {
        Self::UnsupportedType(type_name.into())
    }

    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Registration-time error.
///
/// Every variant aborts the declaration: no envelope is built and nothing is
/// handed to the store or scheduler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    /// A required input was missing or empty.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The codec rejected an argument.
    #[error("argument {index} could not be encoded: {source}")]
    Encoding {
        index: usize,
        #[source]
        source: CodecError,
    },

    /// Declared policies could not be enumerated for the target.
    #[error("policy resolution failed: {0}")]
    PolicyResolution(String),

    /// The recurring scheduler rejected the entry.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// The job store rejected the envelope.
    #[error("job store error: {0}")]
    Store(String),
}

impl DeclarationError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn encoding(index: usize, source: CodecError) -> Self {
        Self::Encoding { index, source }
    }

    pub fn policy_resolution(msg: impl Into<String>) -> Self {
        Self::PolicyResolution(msg.into())
    }
}

/// Execution-time error for a single attempt.
///
/// Retry decisions belong to the job store; nothing here is retried in-process.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The type or method named by the envelope does not exist in this process,
    /// or the envelope itself could not be read.
    #[error("target resolution failed: {0}")]
    TargetResolution(String),

    /// An encoded argument does not match the resolved parameter type.
    #[error("argument {index} could not be decoded: {source}")]
    ArgumentDecoding {
        index: usize,
        #[source]
        source: CodecError,
    },

    /// The job method itself failed; the original error is kept as the source.
    #[error("invocation failed: {source}")]
    InvocationFailed {
        #[source]
        source: BoxError,
    },

    /// The attempt observed a cancellation request.
    #[error("execution cancelled")]
    Cancelled,
}

impl ExecutionError {
    pub fn target_resolution(msg: impl Into<String>) -> Self {
        Self::TargetResolution(msg.into())
    }

    pub fn decoding(index: usize, source: CodecError) -> Self {
        Self::ArgumentDecoding { index, source }
    }

    pub fn invocation_failed(source: BoxError) -> Self {
        Self::InvocationFailed { source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
