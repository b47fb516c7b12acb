//! Backend implementations
//!
//! - `host`: CPU reference backend with native kernels
//! - `opencl`: OpenCL devices (`opencl` feature)
//! - `metal`: Apple GPUs (Apple targets only)

pub mod host;
pub mod metal;
pub mod opencl;

pub use host::{HostBackend, HostKernelFn, KernelArgs};
pub use metal::MetalBackend;
pub use opencl::OpenCLBackend;
