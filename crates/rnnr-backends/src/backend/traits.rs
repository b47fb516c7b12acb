//! Backend trait for kernel dispatch
//!
//! Every accelerator implements this trait once; the execution engine is
//! written against it and never learns which device it is talking to.

use super::types::{BufferHandle, KernelHandle, LaunchConfig};
use crate::error::Result;

/// Capability set an accelerator must provide
///
/// The calls are sequenced and stateful:
///
/// ```text
/// setup ──► create_buffer / create_kernel ──► write_buffer ──► run_kernel* ──► read_buffer
/// ```
///
/// # Lifecycle
///
/// [`Backend::setup`] must be called exactly once before anything else. It
/// discovers the device and creates the execution context and command queue.
/// Every other method returns [`crate::BackendError::NotInitialized`] until
/// it has succeeded.
///
/// # Blocking
///
/// Transfers block until the copy has completed. [`Backend::run_kernel`]
/// blocks until the device has accepted the launch; because the queue is
/// in-order, a later [`Backend::read_buffer`] observes its results.
///
/// # Usage
///
/// ```rust
/// use rnnr_backends::{Backend, HostBackend, LaunchConfig};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut backend = HostBackend::new().with_kernel("double", |item, args| {
///     let i = item.global_id(0);
///     let value = args.arg(1)[i] * 2.0;
///     args.arg_mut(0)[i] = value;
/// });
/// backend.setup()?;
///
/// let src = backend.create_buffer(16, false)?;
/// let dst = backend.create_buffer(16, true)?;
/// let kernel = backend.create_kernel("double", "__kernel void double(...)")?;
///
/// backend.write_buffer(src, &[1.0, 2.0, 3.0, 4.0])?;
/// backend.run_kernel(kernel, &LaunchConfig::linear(4, 1), &[dst, src])?;
///
/// let mut out = [0.0f32; 4];
/// backend.read_buffer(dst, &mut out)?;
/// assert_eq!(out, [2.0, 4.0, 6.0, 8.0]);
/// # Ok(())
/// # }
/// ```
pub trait Backend {
    /// Short identifier used in logs (`host`, `opencl`, `metal`)
    fn name(&self) -> &'static str;

    /// Discover a device and create its context and command queue
    ///
    /// # Errors
    ///
    /// `NoPlatform`, `NoDevice`, `ContextCreationFailed` or
    /// `QueueCreationFailed` depending on which step failed.
    fn setup(&mut self) -> Result<()>;

    // ============================================================================================
    // Kernels
    // ============================================================================================

    /// Compile `source` and resolve the entry point `name`
    ///
    /// # Errors
    ///
    /// `CompileError` carrying the compiler diagnostic (build log) when the
    /// source does not build or does not export `name`.
    fn create_kernel(&mut self, name: &str, source: &str) -> Result<KernelHandle>;

    // ============================================================================================
    // Buffers
    // ============================================================================================

    /// Allocate exactly `byte_size` bytes of device memory
    ///
    /// `writable = false` marks a buffer the host fills and kernels only
    /// read; `writable = true` marks one kernels write into. The flag only
    /// selects allocator access modes and is not enforced.
    fn create_buffer(&mut self, byte_size: usize, writable: bool) -> Result<BufferHandle>;

    /// Blocking host-to-device copy into the start of `buffer`
    ///
    /// # Errors
    ///
    /// `TransferFailed` when `data` is larger than the buffer; nothing is
    /// written in that case.
    fn write_buffer(&mut self, buffer: BufferHandle, data: &[f32]) -> Result<()>;

    /// Blocking device-to-host copy of `out.len()` values from the start of `buffer`
    fn read_buffer(&mut self, buffer: BufferHandle, out: &mut [f32]) -> Result<()>;

    /// Allocated size of `buffer` in bytes
    fn buffer_size(&self, buffer: BufferHandle) -> Result<usize>;

    // ============================================================================================
    // Dispatch
    // ============================================================================================

    /// Bind `args` positionally and enqueue `kernel` over `launch`
    ///
    /// # Errors
    ///
    /// - `ArgBindingFailed` when an argument cannot be bound
    /// - `DispatchFailed` when the launch is rejected, including any
    ///   dimension whose local size does not divide the global size
    fn run_kernel(&mut self, kernel: KernelHandle, launch: &LaunchConfig, args: &[BufferHandle]) -> Result<()>;

    /// Downcast support for backend-specific inspection
    fn as_any(&self) -> &dyn std::any::Any;

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}
