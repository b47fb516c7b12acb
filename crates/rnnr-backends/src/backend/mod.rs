//! Backend trait and types for kernel dispatch

mod traits;
mod types;

pub use traits::Backend;
pub use types::{BufferHandle, KernelHandle, LaunchConfig, WorkItem, WorkSize};
