//! OpenCL backend
//!
//! Drives any OpenCL 1.2+ device through the `opencl3` bindings. Compiled
//! only with the `opencl` feature; without it [`OpenCLBackend::new`]
//! reports the backend as unsupported.
//!
//! ```text
//! OpenCLBackend
//! ├── Device / Context / CommandQueue   - created by setup()
//! ├── buffers  - handle id -> cl_mem (byte-typed)
//! └── kernels  - handle id -> (program, kernel)
//! ```
//!
//! Buffers the host fills are allocated `CL_MEM_READ_ONLY`; buffers kernels
//! write are allocated `CL_MEM_READ_WRITE` so a later statement can read
//! what an earlier one produced.

#[cfg(feature = "opencl")]
use std::collections::HashMap;
#[cfg(feature = "opencl")]
use std::ptr;
#[cfg(feature = "opencl")]
use std::time::Instant;

#[cfg(feature = "opencl")]
use opencl3::command_queue::CommandQueue;
#[cfg(feature = "opencl")]
use opencl3::context::Context;
#[cfg(feature = "opencl")]
use opencl3::device::{Device, CL_DEVICE_TYPE_ALL};
#[cfg(feature = "opencl")]
use opencl3::kernel::Kernel;
#[cfg(feature = "opencl")]
use opencl3::memory::{Buffer as ClBuffer, ClMem, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE};
#[cfg(feature = "opencl")]
use opencl3::platform::get_platforms;
#[cfg(feature = "opencl")]
use opencl3::program::Program;
#[cfg(feature = "opencl")]
use opencl3::types::{cl_mem, cl_uint, CL_BLOCKING};
#[cfg(feature = "opencl")]
use rnnr_tracing::performance::{record_dispatch, record_transfer};

#[cfg(feature = "opencl")]
use crate::backend::{Backend, BufferHandle, KernelHandle, LaunchConfig};
use crate::error::{BackendError, Result};

#[cfg(feature = "opencl")]
struct ClState {
    device: Device,
    context: Context,
    queue: CommandQueue,
}

#[cfg(feature = "opencl")]
struct ClBufferEntry {
    buffer: ClBuffer<u8>,
    byte_size: usize,
}

#[cfg(feature = "opencl")]
struct ClKernel {
    name: String,
    kernel: Kernel,
    _program: Program,
}

/// OpenCL backend using the first platform that exposes a device
#[cfg(feature = "opencl")]
pub struct OpenCLBackend {
    state: Option<ClState>,
    buffers: HashMap<u64, ClBufferEntry>,
    kernels: Vec<ClKernel>,
    next_buffer_id: u64,
}

// SAFETY: every OpenCL object held here is reference counted by the driver
// and only touched through `&mut self`, so moving the backend to another
// thread cannot race on them.
#[cfg(feature = "opencl")]
unsafe impl Send for OpenCLBackend {}

#[cfg(feature = "opencl")]
impl OpenCLBackend {
    /// Create an unconfigured backend; device discovery happens in `setup`.
    pub fn new() -> Result<Self> {
        Ok(Self {
            state: None,
            buffers: HashMap::new(),
            kernels: Vec::new(),
            next_buffer_id: 1,
        })
    }

    /// Check whether any OpenCL platform exposes a device
    pub fn is_available() -> bool {
        get_platforms()
            .map(|platforms| {
                platforms
                    .iter()
                    .any(|platform| platform.get_devices(CL_DEVICE_TYPE_ALL).is_ok_and(|ids| !ids.is_empty()))
            })
            .unwrap_or(false)
    }

    /// Name reported by the selected device, once set up
    pub fn device_name(&self) -> Option<String> {
        self.state.as_ref().and_then(|state| state.device.name().ok())
    }

    fn state(&self) -> Result<&ClState> {
        self.state.as_ref().ok_or(BackendError::NotInitialized("opencl"))
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&ClBufferEntry> {
        self.buffers
            .get(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }

    fn kernel(&self, handle: KernelHandle) -> Result<&ClKernel> {
        handle
            .id()
            .checked_sub(1)
            .and_then(|index| self.kernels.get(index as usize))
            .ok_or(BackendError::InvalidKernelHandle(handle.id()))
    }
}

#[cfg(feature = "opencl")]
impl Backend for OpenCLBackend {
    fn name(&self) -> &'static str {
        "opencl"
    }

    #[tracing::instrument(skip(self))]
    fn setup(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Err(BackendError::AlreadyInitialized(self.name()));
        }

        let platforms = get_platforms().map_err(|err| BackendError::NoPlatform(err.to_string()))?;
        if platforms.is_empty() {
            return Err(BackendError::NoPlatform("no OpenCL platform installed".into()));
        }

        let device_id = platforms
            .iter()
            .filter_map(|platform| platform.get_devices(CL_DEVICE_TYPE_ALL).ok())
            .find_map(|ids| ids.first().copied())
            .ok_or_else(|| BackendError::NoDevice(format!("{} platform(s) expose no device", platforms.len())))?;
        let device = Device::new(device_id);

        let context =
            Context::from_device(&device).map_err(|err| BackendError::ContextCreationFailed(err.to_string()))?;

        #[allow(deprecated)]
        let queue = CommandQueue::create_default(&context, 0)
            .map_err(|err| BackendError::QueueCreationFailed(err.to_string()))?;

        tracing::info!(
            device = device.name().unwrap_or_default(),
            platforms = platforms.len(),
            "opencl_backend_ready"
        );
        self.state = Some(ClState { device, context, queue });
        Ok(())
    }

    fn create_kernel(&mut self, name: &str, source: &str) -> Result<KernelHandle> {
        let state = self.state()?;
        let program = Program::create_and_build_from_source(&state.context, source, "")
            .map_err(|log| BackendError::compile_error(name, log))?;
        let kernel = Kernel::create(&program, name).map_err(|err| BackendError::compile_error(name, err))?;

        self.kernels.push(ClKernel {
            name: name.to_string(),
            kernel,
            _program: program,
        });
        Ok(KernelHandle::new(self.kernels.len() as u64))
    }

    fn create_buffer(&mut self, byte_size: usize, writable: bool) -> Result<BufferHandle> {
        let state = self.state()?;
        let flags = if writable { CL_MEM_READ_WRITE } else { CL_MEM_READ_ONLY };
        // SAFETY: no host pointer is passed, so the driver owns the storage.
        let buffer = unsafe { ClBuffer::<u8>::create(&state.context, flags, byte_size, ptr::null_mut()) }
            .map_err(|err| BackendError::allocation_failed(byte_size, err))?;

        let handle = BufferHandle::new(self.next_buffer_id);
        self.next_buffer_id += 1;
        self.buffers.insert(handle.id(), ClBufferEntry { buffer, byte_size });
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[f32]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let state = self.state.as_ref().ok_or(BackendError::NotInitialized("opencl"))?;
        let entry = self
            .buffers
            .get_mut(&buffer.id())
            .ok_or(BackendError::InvalidBufferHandle(buffer.id()))?;
        if bytes.len() > entry.byte_size {
            return Err(BackendError::transfer_failed(
                buffer,
                format!("{} bytes exceed buffer size {}", bytes.len(), entry.byte_size),
            ));
        }

        let start = Instant::now();
        // SAFETY: blocking write of a slice that fits the allocation.
        unsafe {
            state
                .queue
                .enqueue_write_buffer(&mut entry.buffer, CL_BLOCKING, 0, bytes, &[])
                .map_err(|err| BackendError::transfer_failed(buffer, err))?;
        }
        record_transfer(bytes.len(), "H2D", start.elapsed().as_micros() as u64);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle, out: &mut [f32]) -> Result<()> {
        let state = self.state()?;
        let entry = self.buffer(buffer)?;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        if bytes.len() > entry.byte_size {
            return Err(BackendError::transfer_failed(
                buffer,
                format!("{} bytes exceed buffer size {}", bytes.len(), entry.byte_size),
            ));
        }

        let start = Instant::now();
        // SAFETY: blocking read into a slice no larger than the allocation.
        unsafe {
            state
                .queue
                .enqueue_read_buffer(&entry.buffer, CL_BLOCKING, 0, bytes, &[])
                .map_err(|err| BackendError::transfer_failed(buffer, err))?;
        }
        record_transfer(bytes.len(), "D2H", start.elapsed().as_micros() as u64);
        Ok(())
    }

    fn buffer_size(&self, buffer: BufferHandle) -> Result<usize> {
        self.state()?;
        Ok(self.buffer(buffer)?.byte_size)
    }

    fn run_kernel(&mut self, kernel: KernelHandle, launch: &LaunchConfig, args: &[BufferHandle]) -> Result<()> {
        let state = self.state()?;
        let compiled = self.kernel(kernel)?;
        launch
            .validate()
            .map_err(|err| BackendError::dispatch_failed(&compiled.name, err))?;

        for (index, handle) in args.iter().enumerate() {
            let mem: cl_mem = self
                .buffer(*handle)
                .map_err(|err| BackendError::arg_binding_failed(&compiled.name, index, err))?
                .buffer
                .get();
            // SAFETY: argument `index` of every generated kernel is a global buffer pointer.
            unsafe { compiled.kernel.set_arg(index as cl_uint, &mem) }
                .map_err(|err| BackendError::arg_binding_failed(&compiled.name, index, err))?;
        }

        let global = launch.global.as_array().map(|dim| dim as usize);
        let local = launch.local.as_array().map(|dim| dim as usize);
        let start = Instant::now();
        // SAFETY: both size arrays hold exactly three dimensions.
        unsafe {
            state
                .queue
                .enqueue_nd_range_kernel(
                    compiled.kernel.get(),
                    3,
                    ptr::null(),
                    global.as_ptr(),
                    local.as_ptr(),
                    &[],
                )
                .map_err(|err| BackendError::dispatch_failed(&compiled.name, err))?;
        }
        record_dispatch(
            &compiled.name,
            launch.total_work_items(),
            start.elapsed().as_micros() as u64,
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(not(feature = "opencl"))]
pub struct OpenCLBackend;

#[cfg(not(feature = "opencl"))]
impl OpenCLBackend {
    pub fn new() -> Result<Self> {
        Err(BackendError::UnsupportedOperation(
            "OpenCL backend requires the 'opencl' feature to be enabled".into(),
        ))
    }

    pub fn is_available() -> bool {
        false
    }
}
