//! Error types for rnnr-core operations

use std::path::PathBuf;

use rnnr_backends::BackendError;

use crate::model::ModelState;

/// Result type for rnnr-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading artifacts, setting up a model or running it
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The weight container's length prefix or JSON header is unusable
    #[error("Corrupt weight header: {0}")]
    CorruptHeader(String),

    /// A tensor's byte range runs past the end of the data section
    #[error("Truncated tensor data for `{tensor}`: range ends at byte {end}, data section has {available} bytes")]
    TruncatedData { tensor: String, end: u64, available: u64 },

    #[error("Unknown tensor `{0}`")]
    UnknownTensor(String),

    /// The tensor exists but is not stored as 32-bit floats
    #[error("Tensor `{tensor}` has unsupported dtype {dtype}")]
    UnsupportedDtype { tensor: String, dtype: String },

    #[error("Malformed program description: {0}")]
    MalformedJson(#[source] serde_json::Error),

    /// The program targets a backend tag this runtime does not execute
    #[error("Unsupported backend `{0}`")]
    UnsupportedBackend(String),

    #[error("Statement {statement} references unknown buffer `{key}`")]
    UnresolvedBufferReference { statement: usize, key: String },

    #[error("Statement {statement} references unknown kernel `{kernel}`")]
    UnresolvedKernelReference { statement: usize, kernel: String },

    /// Work sizes with more than three dimensions
    #[error("Statement {statement} declares {dims} work dimensions (at most 3)")]
    InvalidWorkDimensions { statement: usize, dims: usize },

    /// The backend rejected a statement's launch
    #[error("Kernel `{kernel}` failed at statement {statement}: {source}")]
    KernelDispatchFailed {
        statement: usize,
        kernel: String,
        #[source]
        source: BackendError,
    },

    /// Device, compile, allocation or transfer failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// `run` was handed a different number of floats than the program's input
    #[error("Input has {actual} elements, program expects {expected}")]
    InputLength { expected: usize, actual: usize },

    #[error("Model is {actual}, operation requires {expected}")]
    InvalidState { expected: ModelState, actual: ModelState },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error came from loading an artifact rather than using a model
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            Self::CorruptHeader(_)
                | Self::TruncatedData { .. }
                | Self::MalformedJson(_)
                | Self::UnsupportedBackend(_)
                | Self::Io { .. }
        )
    }

    /// Index of the statement this error is attributed to, if any
    pub fn statement(&self) -> Option<usize> {
        match self {
            Self::UnresolvedBufferReference { statement, .. }
            | Self::UnresolvedKernelReference { statement, .. }
            | Self::InvalidWorkDimensions { statement, .. }
            | Self::KernelDispatchFailed { statement, .. } => Some(*statement),
            _ => None,
        }
    }
}
