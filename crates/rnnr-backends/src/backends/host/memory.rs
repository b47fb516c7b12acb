//! Host memory manager
//!
//! Buffers live in a map keyed by handle id. Contents are stored as `f32`
//! since every transfer in the contract is float-typed.

use std::collections::HashMap;

use crate::backend::BufferHandle;
use crate::error::{BackendError, Result};

const ELEMENT_BYTES: usize = std::mem::size_of::<f32>();

#[derive(Debug)]
struct HostBuffer {
    data: Vec<f32>,
    byte_size: usize,
    writable: bool,
}

#[derive(Debug)]
pub(crate) struct HostMemory {
    buffers: HashMap<u64, HostBuffer>,
    next_buffer_id: u64,
}

impl HostMemory {
    pub(crate) fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_buffer_id: 1,
        }
    }

    pub(crate) fn allocate_buffer(&mut self, byte_size: usize, writable: bool) -> Result<BufferHandle> {
        let elements = byte_size / ELEMENT_BYTES;
        let mut data = Vec::new();
        data.try_reserve_exact(elements)
            .map_err(|err| BackendError::allocation_failed(byte_size, err))?;
        data.resize(elements, 0.0);

        let handle = BufferHandle::new(self.next_buffer_id);
        self.next_buffer_id += 1;
        self.buffers.insert(
            handle.id(),
            HostBuffer {
                data,
                byte_size,
                writable,
            },
        );
        Ok(handle)
    }

    pub(crate) fn contains(&self, handle: BufferHandle) -> bool {
        self.buffers.contains_key(&handle.id())
    }

    pub(crate) fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub(crate) fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
        Ok(self.get(handle)?.byte_size)
    }

    pub(crate) fn is_writable(&self, handle: BufferHandle) -> Result<bool> {
        Ok(self.get(handle)?.writable)
    }

    pub(crate) fn write(&mut self, handle: BufferHandle, data: &[f32]) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;
        check_fits(handle, data.len(), buffer.byte_size)?;
        buffer.data[..data.len()].copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn read(&self, handle: BufferHandle, out: &mut [f32]) -> Result<()> {
        let buffer = self.get(handle)?;
        check_fits(handle, out.len(), buffer.byte_size)?;
        out.copy_from_slice(&buffer.data[..out.len()]);
        Ok(())
    }

    /// Move a buffer's contents out for the duration of a dispatch.
    pub(crate) fn take(&mut self, handle: BufferHandle) -> Result<Vec<f32>> {
        let buffer = self
            .buffers
            .get_mut(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;
        Ok(std::mem::take(&mut buffer.data))
    }

    pub(crate) fn restore(&mut self, handle: BufferHandle, data: Vec<f32>) {
        if let Some(buffer) = self.buffers.get_mut(&handle.id()) {
            buffer.data = data;
        }
    }

    fn get(&self, handle: BufferHandle) -> Result<&HostBuffer> {
        self.buffers
            .get(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }
}

fn check_fits(handle: BufferHandle, elements: usize, byte_size: usize) -> Result<()> {
    let bytes = elements.saturating_mul(ELEMENT_BYTES);
    if bytes > byte_size {
        return Err(BackendError::transfer_failed(
            handle,
            format!("{bytes} bytes exceed buffer size {byte_size}"),
        ));
    }
    Ok(())
}
