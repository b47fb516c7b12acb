//! Accelerator backends for the rnnr kernel runtime
//!
//! This crate provides:
//! - **Backend trait**: the capability set every accelerator implements
//! - **Handles and launch geometry**: `BufferHandle`, `KernelHandle`, `LaunchConfig`
//! - **Host backend**: CPU reference implementation with native kernels
//! - **OpenCL / Metal backends**: device implementations
//!
//! ```text
//!                ┌──────────────────────────────┐
//!                │      rnnr-core  (Model)      │
//!                └──────────────┬───────────────┘
//!                               │ dyn Backend
//!          ┌────────────────────┼────────────────────┐
//!          ▼                    ▼                    ▼
//!    ┌───────────┐        ┌───────────┐        ┌───────────┐
//!    │   Host    │        │  OpenCL   │        │   Metal   │
//!    └───────────┘        └───────────┘        └───────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use rnnr_backends::{Backend, HostBackend, LaunchConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut backend = HostBackend::new().with_kernel("add", |item, args| {
//!     let i = item.global_id(0);
//!     let sum = args.arg(1)[i] + args.arg(2)[i];
//!     args.arg_mut(0)[i] = sum;
//! });
//! backend.setup()?;
//!
//! let a = backend.create_buffer(16, false)?;
//! let c = backend.create_buffer(16, true)?;
//! let add = backend.create_kernel("add", "__kernel void add(...)")?;
//!
//! backend.write_buffer(a, &[1.0, 2.0, 3.0, 4.0])?;
//! backend.run_kernel(add, &LaunchConfig::linear(4, 1), &[c, a, a])?;
//!
//! let mut out = [0.0f32; 4];
//! backend.read_buffer(c, &mut out)?;
//! assert_eq!(out, [2.0, 4.0, 6.0, 8.0]);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod error;
pub mod kind;

pub use backend::{Backend, BufferHandle, KernelHandle, LaunchConfig, WorkItem, WorkSize};
pub use backends::{HostBackend, HostKernelFn, KernelArgs, MetalBackend, OpenCLBackend};
pub use error::{BackendError, Result};
pub use kind::{create_backend, BackendKind};
