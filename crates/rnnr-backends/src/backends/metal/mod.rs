//! Metal backend for Apple GPUs
//!
//! Buffers use shared storage so host transfers are plain copies through
//! `contents()`. Each kernel key gets its own library and compute pipeline.
//! A dispatch encodes `global / local` threadgroups of `local` threads,
//! commits, and waits for completion.
//!
//! ```text
//! MetalBackend
//! ├── Device / CommandQueue   - created by setup()
//! ├── buffers                 - handle id -> MTLBuffer (shared storage)
//! └── pipelines               - handle id -> MTLComputePipelineState
//! ```
//!
//! On other targets [`MetalBackend::new`] reports the backend as unsupported.

#[cfg(target_vendor = "apple")]
use std::collections::HashMap;
#[cfg(target_vendor = "apple")]
use std::time::Instant;

#[cfg(target_vendor = "apple")]
use metal::{
    Buffer as MetalBuffer, CommandQueue, CompileOptions, ComputePipelineState, Device, MTLCommandBufferStatus,
    MTLResourceOptions, MTLSize,
};
#[cfg(target_vendor = "apple")]
use rnnr_tracing::performance::{record_dispatch, record_transfer};

#[cfg(target_vendor = "apple")]
use crate::backend::{Backend, BufferHandle, KernelHandle, LaunchConfig};
use crate::error::{BackendError, Result};

#[cfg(target_vendor = "apple")]
struct MetalState {
    device: Device,
    queue: CommandQueue,
}

#[cfg(target_vendor = "apple")]
struct MetalKernel {
    name: String,
    pipeline: ComputePipelineState,
}

/// Metal backend using the system default device
#[cfg(target_vendor = "apple")]
pub struct MetalBackend {
    state: Option<MetalState>,
    buffers: HashMap<u64, MetalBuffer>,
    kernels: Vec<MetalKernel>,
    next_buffer_id: u64,
}

#[cfg(target_vendor = "apple")]
impl MetalBackend {
    /// Create an unconfigured backend; the device is acquired in `setup`.
    pub fn new() -> Result<Self> {
        Ok(Self {
            state: None,
            buffers: HashMap::new(),
            kernels: Vec::new(),
            next_buffer_id: 1,
        })
    }

    pub fn is_available() -> bool {
        Device::system_default().is_some()
    }

    fn state(&self) -> Result<&MetalState> {
        self.state.as_ref().ok_or(BackendError::NotInitialized("metal"))
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&MetalBuffer> {
        self.buffers
            .get(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }

    fn kernel(&self, handle: KernelHandle) -> Result<&MetalKernel> {
        handle
            .id()
            .checked_sub(1)
            .and_then(|index| self.kernels.get(index as usize))
            .ok_or(BackendError::InvalidKernelHandle(handle.id()))
    }
}

#[cfg(target_vendor = "apple")]
impl Backend for MetalBackend {
    fn name(&self) -> &'static str {
        "metal"
    }

    #[tracing::instrument(skip(self))]
    fn setup(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Err(BackendError::AlreadyInitialized(self.name()));
        }
        let device =
            Device::system_default().ok_or_else(|| BackendError::NoDevice("no system default Metal device".into()))?;
        let queue = device.new_command_queue();
        tracing::info!(device = device.name(), "metal_backend_ready");
        self.state = Some(MetalState { device, queue });
        Ok(())
    }

    fn create_kernel(&mut self, name: &str, source: &str) -> Result<KernelHandle> {
        let state = self.state()?;
        let library = state
            .device
            .new_library_with_source(source, &CompileOptions::new())
            .map_err(|diagnostic| BackendError::compile_error(name, diagnostic))?;
        let function = library
            .get_function(name, None)
            .map_err(|diagnostic| BackendError::compile_error(name, diagnostic))?;
        let pipeline = state
            .device
            .new_compute_pipeline_state_with_function(&function)
            .map_err(|diagnostic| BackendError::compile_error(name, diagnostic))?;

        self.kernels.push(MetalKernel {
            name: name.to_string(),
            pipeline,
        });
        Ok(KernelHandle::new(self.kernels.len() as u64))
    }

    fn create_buffer(&mut self, byte_size: usize, _writable: bool) -> Result<BufferHandle> {
        let state = self.state()?;
        let buffer = state
            .device
            .new_buffer(byte_size as u64, MTLResourceOptions::StorageModeShared);
        if buffer.contents().is_null() && byte_size > 0 {
            return Err(BackendError::allocation_failed(byte_size, "shared buffer has no host mapping"));
        }

        let handle = BufferHandle::new(self.next_buffer_id);
        self.next_buffer_id += 1;
        self.buffers.insert(handle.id(), buffer);
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[f32]) -> Result<()> {
        self.state()?;
        let target = self.buffer(buffer)?;
        let byte_len = std::mem::size_of_val(data);
        if byte_len as u64 > target.length() {
            return Err(BackendError::transfer_failed(
                buffer,
                format!("{byte_len} bytes exceed buffer size {}", target.length()),
            ));
        }

        let start = Instant::now();
        // SAFETY: shared-storage contents are host visible, f32-aligned and at least `byte_len` long.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), target.contents() as *mut f32, data.len());
        }
        record_transfer(byte_len, "H2D", start.elapsed().as_micros() as u64);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle, out: &mut [f32]) -> Result<()> {
        self.state()?;
        let source = self.buffer(buffer)?;
        let byte_len = std::mem::size_of_val(out);
        if byte_len as u64 > source.length() {
            return Err(BackendError::transfer_failed(
                buffer,
                format!("{byte_len} bytes exceed buffer size {}", source.length()),
            ));
        }

        let start = Instant::now();
        // SAFETY: see `write_buffer`; the copy stays within the allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(source.contents() as *const f32, out.as_mut_ptr(), out.len());
        }
        record_transfer(byte_len, "D2H", start.elapsed().as_micros() as u64);
        Ok(())
    }

    fn buffer_size(&self, buffer: BufferHandle) -> Result<usize> {
        self.state()?;
        Ok(self.buffer(buffer)?.length() as usize)
    }

    fn run_kernel(&mut self, kernel: KernelHandle, launch: &LaunchConfig, args: &[BufferHandle]) -> Result<()> {
        let state = self.state()?;
        let compiled = self.kernel(kernel)?;
        launch
            .validate()
            .map_err(|err| BackendError::dispatch_failed(&compiled.name, err))?;

        let threads_per_group = launch.local.total();
        let max_threads = compiled.pipeline.max_total_threads_per_threadgroup();
        if threads_per_group > max_threads {
            return Err(BackendError::dispatch_failed(
                &compiled.name,
                format!("{threads_per_group} threads per group exceed pipeline limit {max_threads}"),
            ));
        }

        let bound = args
            .iter()
            .enumerate()
            .map(|(index, handle)| {
                self.buffer(*handle)
                    .map_err(|err| BackendError::arg_binding_failed(&compiled.name, index, err))
            })
            .collect::<Result<Vec<_>>>()?;

        let start = Instant::now();
        let command_buffer = state.queue.new_command_buffer();
        let encoder = command_buffer.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(&compiled.pipeline);
        for (index, buffer) in bound.into_iter().enumerate() {
            encoder.set_buffer(index as u64, Some(buffer), 0);
        }

        let groups = launch.groups();
        encoder.dispatch_thread_groups(
            MTLSize::new(groups.x, groups.y, groups.z),
            MTLSize::new(launch.local.x, launch.local.y, launch.local.z),
        );
        encoder.end_encoding();
        command_buffer.commit();
        command_buffer.wait_until_completed();

        if matches!(command_buffer.status(), MTLCommandBufferStatus::Error) {
            return Err(BackendError::dispatch_failed(&compiled.name, "command buffer completed with an error"));
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

#[cfg(not(target_vendor = "apple"))]
pub struct MetalBackend;

#[cfg(not(target_vendor = "apple"))]
impl MetalBackend {
    pub fn new() -> Result<Self> {
        Err(BackendError::UnsupportedOperation(
            "Metal backend is only available on Apple targets".into(),
        ))
    }

    pub fn is_available() -> bool {
        false
    }
}
