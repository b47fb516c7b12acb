//! Backend selection

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use crate::backend::Backend;
use crate::backends::{HostBackend, MetalBackend, OpenCLBackend};
use crate::error::{BackendError, Result};

/// Backend to instantiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    /// CPU reference backend; kernels must be registered natively
    Host,
    /// OpenCL device (requires the `opencl` feature)
    #[default]
    OpenCl,
    /// Apple Metal device
    Metal,
}

impl BackendKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Host => "host",
            BackendKind::OpenCl => "opencl",
            BackendKind::Metal => "metal",
        }
    }

    /// Whether this kind was compiled in and a device is present
    pub fn is_available(&self) -> bool {
        match self {
            BackendKind::Host => true,
            BackendKind::OpenCl => OpenCLBackend::is_available(),
            BackendKind::Metal => MetalBackend::is_available(),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = BackendError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "host" | "cpu" => Ok(BackendKind::Host),
            "opencl" | "cl" | "gpu" => Ok(BackendKind::OpenCl),
            "metal" | "mtl" => Ok(BackendKind::Metal),
            other => Err(BackendError::unsupported(format!("unknown backend `{other}`"))),
        }
    }
}

/// Instantiate an unconfigured backend of the given kind
///
/// The returned backend has not been set up. A host backend comes back with
/// an empty kernel registry.
///
/// # Errors
///
/// `UnsupportedOperation` when the kind was not compiled into this build.
#[tracing::instrument]
pub fn create_backend(kind: BackendKind) -> Result<Box<dyn Backend + Send>> {
    let start = Instant::now();
    let backend: Box<dyn Backend + Send> = match kind {
        BackendKind::Host => Box::new(HostBackend::new()),
        #[cfg(feature = "opencl")]
        BackendKind::OpenCl => Box::new(OpenCLBackend::new()?),
        #[cfg(not(feature = "opencl"))]
        BackendKind::OpenCl => {
            return Err(BackendError::unsupported(
                "OpenCL backend requires the 'opencl' feature to be enabled",
            ))
        }
        #[cfg(target_vendor = "apple")]
        BackendKind::Metal => Box::new(MetalBackend::new()?),
        #[cfg(not(target_vendor = "apple"))]
        BackendKind::Metal => {
            return Err(BackendError::unsupported(
                "Metal backend is only available on Apple targets",
            ))
        }
    };

    tracing::debug!(
        duration_us = start.elapsed().as_micros() as u64,
        backend = %kind,
        "backend_created"
    );
    Ok(backend)
}
