//! Error types for backend operations

use std::fmt;

use crate::backend::BufferHandle;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur while driving an accelerator
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No compute platform is installed
    #[error("no compute platform available: {0}")]
    NoPlatform(String),

    /// A platform exists but exposes no usable device
    #[error("no compute device available: {0}")]
    NoDevice(String),

    #[error("failed to create execution context: {0}")]
    ContextCreationFailed(String),

    #[error("failed to create command queue: {0}")]
    QueueCreationFailed(String),

    /// An operation was issued before `setup`
    #[error("backend `{0}` used before setup")]
    NotInitialized(&'static str),

    /// `setup` was issued twice
    #[error("backend `{0}` is already set up")]
    AlreadyInitialized(&'static str),

    /// Kernel source failed to compile or does not export the entry point
    #[error("failed to compile kernel `{kernel}`: {diagnostic}")]
    CompileError { kernel: String, diagnostic: String },

    #[error("failed to allocate {size} bytes: {reason}")]
    AllocationFailed { size: usize, reason: String },

    #[error("invalid buffer handle: {0}")]
    InvalidBufferHandle(u64),

    #[error("invalid kernel handle: {0}")]
    InvalidKernelHandle(u64),

    /// Host/device copy failed or would overrun the buffer
    #[error("transfer on {buffer} failed: {reason}")]
    TransferFailed { buffer: BufferHandle, reason: String },

    #[error("failed to bind argument {index} of kernel `{kernel}`: {reason}")]
    ArgBindingFailed {
        kernel: String,
        index: usize,
        reason: String,
    },

    #[error("failed to dispatch kernel `{kernel}`: {reason}")]
    DispatchFailed { kernel: String, reason: String },

    /// A local work size does not evenly divide the global work size
    #[error("local size {local} does not divide global size {global} in dimension {dim}")]
    InvalidWorkSize { dim: usize, global: u64, local: u64 },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl BackendError {
    /// Create a compile error carrying the underlying diagnostic
    pub fn compile_error(kernel: impl Into<String>, diagnostic: impl fmt::Display) -> Self {
        Self::CompileError {
            kernel: kernel.into(),
            diagnostic: diagnostic.to_string(),
        }
    }

    pub fn allocation_failed(size: usize, reason: impl fmt::Display) -> Self {
        Self::AllocationFailed {
            size,
            reason: reason.to_string(),
        }
    }

    pub fn transfer_failed(buffer: BufferHandle, reason: impl fmt::Display) -> Self {
        Self::TransferFailed {
            buffer,
            reason: reason.to_string(),
        }
    }

    pub fn arg_binding_failed(kernel: impl Into<String>, index: usize, reason: impl fmt::Display) -> Self {
        Self::ArgBindingFailed {
            kernel: kernel.into(),
            index,
            reason: reason.to_string(),
        }
    }

    pub fn dispatch_failed(kernel: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::DispatchFailed {
            kernel: kernel.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Whether this error came from device discovery or context setup.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::NoPlatform(_) | Self::NoDevice(_) | Self::ContextCreationFailed(_) | Self::QueueCreationFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_kernel() {
        let err = BackendError::compile_error("add", "expected ';'");
        assert_eq!(err.to_string(), "failed to compile kernel `add`: expected ';'");

        let err = BackendError::dispatch_failed("relu", BackendError::InvalidWorkSize { dim: 0, global: 10, local: 3 });
        assert_eq!(
            err.to_string(),
            "failed to dispatch kernel `relu`: local size 3 does not divide global size 10 in dimension 0"
        );
    }

    #[test]
    fn test_transfer_error_names_buffer() {
        let err = BackendError::transfer_failed(BufferHandle::new(7), "too large");
        assert_eq!(err.to_string(), "transfer on buf7 failed: too large");
    }

    #[test]
    fn test_setup_failure_classification() {
        assert!(BackendError::NoDevice("none".into()).is_setup_failure());
        assert!(BackendError::QueueCreationFailed("x".into()).is_setup_failure());
        assert!(!BackendError::InvalidBufferHandle(1).is_setup_failure());
    }
}
