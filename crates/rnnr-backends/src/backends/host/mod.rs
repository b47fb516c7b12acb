//! Host backend
//!
//! Reference implementation of the [`Backend`] trait that runs on the CPU.
//! There is no device compiler on the host, so kernels are native Rust
//! closures registered under their entry-point name. `create_kernel`
//! resolves the name against that registry and keeps the source text only
//! for diagnostics.
//!
//! ```text
//! HostBackend
//! ├── registry   - entry point name -> closure
//! ├── kernels    - compiled handles (index + 1 = handle id)
//! └── HostMemory - buffers shared between clones
//! ```
//!
//! A dispatch walks every work group and every item inside it
//! sequentially, so a kernel observes the same ordering on every run.

pub(crate) mod memory;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use memory::HostMemory;
use parking_lot::RwLock;
use rnnr_tracing::performance::{record_dispatch, record_transfer};

use crate::backend::{Backend, BufferHandle, KernelHandle, LaunchConfig, WorkItem};
use crate::error::{BackendError, Result};

/// Native kernel body, invoked once per work item.
pub type HostKernelFn = Arc<dyn Fn(&WorkItem, &mut KernelArgs) + Send + Sync>;

/// Positional kernel arguments for one dispatch
///
/// The same buffer may be bound at several positions; every position then
/// views the same storage.
pub struct KernelArgs {
    slots: Vec<Vec<f32>>,
    positions: Vec<usize>,
}

impl KernelArgs {
    /// Number of bound arguments
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Contents of argument `index`
    ///
    /// # Panics
    ///
    /// Panics when `index >= self.len()`.
    pub fn arg(&self, index: usize) -> &[f32] {
        &self.slots[self.positions[index]]
    }

    /// Mutable contents of argument `index`
    ///
    /// # Panics
    ///
    /// Panics when `index >= self.len()`.
    pub fn arg_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.slots[self.positions[index]]
    }

    pub fn get(&self, index: usize) -> Option<&[f32]> {
        self.positions.get(index).map(|&slot| self.slots[slot].as_slice())
    }
}

struct HostKernel {
    name: String,
    func: HostKernelFn,
}

/// CPU backend executing registered native kernels
///
/// Clones share buffer memory but keep their own kernel tables.
#[derive(Clone)]
pub struct HostBackend {
    initialized: bool,
    registry: HashMap<String, HostKernelFn>,
    kernels: Vec<Arc<HostKernel>>,
    memory: Arc<RwLock<HostMemory>>,
}

impl HostBackend {
    /// Create a host backend with an empty kernel registry
    pub fn new() -> Self {
        Self {
            initialized: false,
            registry: HashMap::new(),
            kernels: Vec::new(),
            memory: Arc::new(RwLock::new(HostMemory::new())),
        }
    }

    /// Register `func` as the implementation of entry point `name`
    pub fn with_kernel<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&WorkItem, &mut KernelArgs) + Send + Sync + 'static,
    {
        self.register_kernel(name, func);
        self
    }

    /// Register or replace the implementation of entry point `name`
    pub fn register_kernel<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&WorkItem, &mut KernelArgs) + Send + Sync + 'static,
    {
        self.registry.insert(name.into(), Arc::new(func));
    }

    /// Whether `setup` has completed
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn buffer_count(&self) -> usize {
        self.memory.read().buffer_count()
    }

    pub fn kernel_count(&self) -> usize {
        self.kernels.len()
    }

    /// Access mode a buffer was allocated with
    pub fn is_writable(&self, buffer: BufferHandle) -> Result<bool> {
        self.memory.read().is_writable(buffer)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(BackendError::NotInitialized(self.name()))
        }
    }

    fn kernel(&self, handle: KernelHandle) -> Result<Arc<HostKernel>> {
        handle
            .id()
            .checked_sub(1)
            .and_then(|index| self.kernels.get(index as usize))
            .cloned()
            .ok_or(BackendError::InvalidKernelHandle(handle.id()))
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HostBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entry_points: Vec<&str> = self.registry.keys().map(String::as_str).collect();
        entry_points.sort_unstable();
        f.debug_struct("HostBackend")
            .field("initialized", &self.initialized)
            .field("entry_points", &entry_points)
            .field("kernels", &self.kernels.len())
            .finish()
    }
}

impl Backend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn setup(&mut self) -> Result<()> {
        if self.initialized {
            return Err(BackendError::AlreadyInitialized(self.name()));
        }
        self.initialized = true;
        tracing::debug!(entry_points = self.registry.len(), "host_backend_ready");
        Ok(())
    }

    fn create_kernel(&mut self, name: &str, source: &str) -> Result<KernelHandle> {
        self.ensure_initialized()?;
        let func = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::compile_error(name, "no host implementation registered for entry point"))?;
        if !source.contains(name) {
            return Err(BackendError::compile_error(
                name,
                format!("entry point not found in {} bytes of source", source.len()),
            ));
        }

        self.kernels.push(Arc::new(HostKernel {
            name: name.to_string(),
            func,
        }));
        let handle = KernelHandle::new(self.kernels.len() as u64);
        tracing::trace!(kernel = name, handle = %handle, "host_kernel_created");
        Ok(handle)
    }

    fn create_buffer(&mut self, byte_size: usize, writable: bool) -> Result<BufferHandle> {
        self.ensure_initialized()?;
        self.memory.write().allocate_buffer(byte_size, writable)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[f32]) -> Result<()> {
        self.ensure_initialized()?;
        let start = Instant::now();
        self.memory.write().write(buffer, data)?;
        record_transfer(std::mem::size_of_val(data), "H2D", start.elapsed().as_micros() as u64);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle, out: &mut [f32]) -> Result<()> {
        self.ensure_initialized()?;
        let start = Instant::now();
        self.memory.read().read(buffer, out)?;
        record_transfer(std::mem::size_of_val(out), "D2H", start.elapsed().as_micros() as u64);
        Ok(())
    }

    fn buffer_size(&self, buffer: BufferHandle) -> Result<usize> {
        self.ensure_initialized()?;
        self.memory.read().buffer_size(buffer)
    }

    fn run_kernel(&mut self, kernel: KernelHandle, launch: &LaunchConfig, args: &[BufferHandle]) -> Result<()> {
        self.ensure_initialized()?;
        let kernel = self.kernel(kernel)?;
        launch
            .validate()
            .map_err(|err| BackendError::dispatch_failed(&kernel.name, err))?;

        let start = Instant::now();
        let mut memory = self.memory.write();

        let mut bound: Vec<BufferHandle> = Vec::with_capacity(args.len());
        let mut positions = Vec::with_capacity(args.len());
        for (index, handle) in args.iter().enumerate() {
            if !memory.contains(*handle) {
                return Err(BackendError::arg_binding_failed(
                    &kernel.name,
                    index,
                    BackendError::InvalidBufferHandle(handle.id()),
                ));
            }
            let slot = match bound.iter().position(|h| h == handle) {
                Some(slot) => slot,
                None => {
                    bound.push(*handle);
                    bound.len() - 1
                }
            };
            positions.push(slot);
        }

        let slots = bound
            .iter()
            .map(|handle| memory.take(*handle))
            .collect::<Result<Vec<_>>>()?;
        let mut kernel_args = KernelArgs { slots, positions };

        execute(&kernel.func, launch, &mut kernel_args);

        for (handle, data) in bound.iter().zip(kernel_args.slots) {
            memory.restore(*handle, data);
        }

        record_dispatch(
            &kernel.name,
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

fn execute(func: &HostKernelFn, launch: &LaunchConfig, args: &mut KernelArgs) {
    let groups = launch.groups();
    let local = launch.local;
    let local_size = local.as_array();

    for gz in 0..groups.z {
        for gy in 0..groups.y {
            for gx in 0..groups.x {
                for lz in 0..local.z {
                    for ly in 0..local.y {
                        for lx in 0..local.x {
                            let item = WorkItem::new([gx, gy, gz], [lx, ly, lz], local_size);
                            func(&item, args);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::WorkSize;

    fn add_backend() -> HostBackend {
        let mut backend = HostBackend::new().with_kernel("add", |item, args| {
            let i = item.global_id(0);
            let sum = args.arg(1)[i] + args.arg(2)[i];
            args.arg_mut(0)[i] = sum;
        });
        backend.setup().unwrap();
        backend
    }

    #[test]
    fn test_operations_require_setup() {
        let mut backend = HostBackend::new();
        assert!(matches!(
            backend.create_buffer(16, false),
            Err(BackendError::NotInitialized("host"))
        ));
        assert!(matches!(
            backend.create_kernel("add", "add"),
            Err(BackendError::NotInitialized(_))
        ));
        backend.setup().unwrap();
        assert!(backend.is_initialized());
        assert!(matches!(backend.setup(), Err(BackendError::AlreadyInitialized(_))));
    }

    #[test]
    fn test_create_kernel_requires_registration() {
        let mut backend = add_backend();
        let err = backend.create_kernel("mul", "__kernel void mul() {}").unwrap_err();
        assert!(matches!(err, BackendError::CompileError { ref kernel, .. } if kernel == "mul"));
    }

    #[test]
    fn test_create_kernel_requires_entry_point_in_source() {
        let mut backend = add_backend();
        let err = backend.create_kernel("add", "__kernel void sub() {}").unwrap_err();
        assert!(matches!(err, BackendError::CompileError { .. }));
        assert_eq!(backend.kernel_count(), 0);
    }

    #[test]
    fn test_buffers_record_size_and_mode() {
        let mut backend = add_backend();
        let a = backend.create_buffer(64, false).unwrap();
        let c = backend.create_buffer(64, true).unwrap();
        assert_eq!(backend.buffer_size(a).unwrap(), 64);
        assert!(!backend.is_writable(a).unwrap());
        assert!(backend.is_writable(c).unwrap());
        assert_eq!(backend.buffer_count(), 2);
    }

    #[test]
    fn test_run_add_kernel() {
        let mut backend = add_backend();
        let a = backend.create_buffer(16, false).unwrap();
        let b = backend.create_buffer(16, false).unwrap();
        let c = backend.create_buffer(16, true).unwrap();
        let kernel = backend.create_kernel("add", "__kernel void add()").unwrap();

        backend.write_buffer(a, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        backend.write_buffer(b, &[10.0, 20.0, 30.0, 40.0]).unwrap();
        backend
            .run_kernel(kernel, &LaunchConfig::linear(4, 2), &[c, b, a])
            .unwrap();

        let mut out = [0.0f32; 4];
        backend.read_buffer(c, &mut out).unwrap();
        assert_eq!(out, [11.0, 22.0, 33.0, 44.0]);
    }

    #[test]
    fn test_aliased_arguments_share_storage() {
        let mut backend = add_backend();
        let a = backend.create_buffer(8, true).unwrap();
        let kernel = backend.create_kernel("add", "add").unwrap();
        backend.write_buffer(a, &[1.5, 2.5]).unwrap();
        backend
            .run_kernel(kernel, &LaunchConfig::linear(2, 1), &[a, a, a])
            .unwrap();
        let mut out = [0.0f32; 2];
        backend.read_buffer(a, &mut out).unwrap();
        assert_eq!(out, [3.0, 5.0]);
    }

    #[test]
    fn test_unknown_argument_fails_binding() {
        let mut backend = add_backend();
        let a = backend.create_buffer(8, false).unwrap();
        let kernel = backend.create_kernel("add", "add").unwrap();
        let err = backend
            .run_kernel(kernel, &LaunchConfig::linear(2, 1), &[a, BufferHandle::new(99), a])
            .unwrap_err();
        assert!(matches!(err, BackendError::ArgBindingFailed { index: 1, .. }));

        // Buffers are untouched by a failed binding.
        let mut out = [1.0f32; 2];
        backend.read_buffer(a, &mut out).unwrap();
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn test_indivisible_work_size_fails_dispatch() {
        let mut backend = add_backend();
        let a = backend.create_buffer(40, true).unwrap();
        let kernel = backend.create_kernel("add", "add").unwrap();
        let err = backend
            .run_kernel(kernel, &LaunchConfig::linear(10, 3), &[a, a, a])
            .unwrap_err();
        assert!(matches!(err, BackendError::DispatchFailed { ref kernel, .. } if kernel == "add"));
    }

    #[test]
    fn test_unknown_kernel_handle() {
        let mut backend = add_backend();
        assert!(matches!(
            backend.run_kernel(KernelHandle::new(0), &LaunchConfig::default(), &[]),
            Err(BackendError::InvalidKernelHandle(0))
        ));
        assert!(matches!(
            backend.run_kernel(KernelHandle::new(5), &LaunchConfig::default(), &[]),
            Err(BackendError::InvalidKernelHandle(5))
        ));
    }

    #[test]
    fn test_three_dimensional_launch_visits_every_item_once() {
        let mut backend = HostBackend::new().with_kernel("count", |item, args| {
            let index = item.global_id(0) + 4 * (item.global_id(1) + 2 * item.global_id(2));
            args.arg_mut(0)[index] += 1.0;
        });
        backend.setup().unwrap();
        let counts = backend.create_buffer(4 * 2 * 3 * 4, true).unwrap();
        let kernel = backend.create_kernel("count", "count").unwrap();
        let launch = LaunchConfig::new(WorkSize::new(4, 2, 3), WorkSize::new(2, 1, 3));
        backend.run_kernel(kernel, &launch, &[counts]).unwrap();

        let mut out = vec![0.0f32; 24];
        backend.read_buffer(counts, &mut out).unwrap();
        assert!(out.iter().all(|&count| count == 1.0));
    }

    #[test]
    fn test_clones_share_memory() {
        let mut backend = add_backend();
        let observer = backend.clone();
        let a = backend.create_buffer(8, false).unwrap();
        backend.write_buffer(a, &[4.0, 2.0]).unwrap();
        assert_eq!(observer.buffer_count(), 1);
        assert_eq!(observer.buffer_size(a).unwrap(), 8);
    }

    #[test]
    fn test_downcast() {
        let backend: Box<dyn Backend> = Box::new(HostBackend::new());
        assert!(backend.as_any().downcast_ref::<HostBackend>().is_some());
    }
}
