//! Host-to-device staged buffers
//!
//! A [`StagedBuffer`] pairs a persistently mapped staging buffer with a device-local target of
//! the same capacity. The CPU edits the staging side freely between frames; once per frame the
//! copy to the device side is recorded together with the barrier that makes it visible to the
//! consuming shader stage.
//!
//! Two byte counters are tracked:
//! - the staged size, the number of valid bytes in the staging buffer;
//! - the device size, the number of bytes the last *recorded* copy moved. It changes when the
//!   copy is recorded, not when it executes.

use ash::vk;
use std::marker::PhantomData;
use std::sync::Arc;

use super::allocator::{MemoryAllocator, MemoryPolicy};
use super::buffer::AllocatedBuffer;
use crate::render::backends::vulkan::device::GpuDevice;
use crate::render::backends::vulkan::error::VulkanResult;
use crate::render::backends::vulkan::rendering::commands::CommandRecorder;

/// Staging buffer plus device-local target
#[derive(Debug)]
pub struct StagedBuffer {
    device_buffer: AllocatedBuffer,
    staging_buffer: AllocatedBuffer,
    staged_size: usize,
    device_size: vk::DeviceSize,
    dirty: bool,
}

impl StagedBuffer {
    /// Allocate both halves with `capacity` bytes each
    ///
    /// The target gets `usage | TRANSFER_DST | SHADER_DEVICE_ADDRESS`; the staging side is a
    /// mapped `TRANSFER_SRC` buffer.
    pub fn allocate(
        device: &dyn GpuDevice,
        allocator: &Arc<dyn MemoryAllocator>,
        capacity: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        let device_buffer = AllocatedBuffer::allocate(
            device,
            allocator,
            capacity,
            usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryPolicy::DEVICE_LOCAL,
        )?;
        let staging_buffer = AllocatedBuffer::allocate(
            device,
            allocator,
            capacity,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryPolicy::HOST_UPLOAD_MAPPED,
        )?;

        Ok(Self {
            device_buffer,
            staging_buffer,
            staged_size: 0,
            device_size: 0,
            dirty: false,
        })
    }

    /// Capacity of the staging buffer in bytes
    pub fn staging_capacity(&self) -> usize {
        self.staging_buffer.size() as usize
    }

    /// Valid bytes in the staging buffer
    pub fn staged_size(&self) -> usize {
        self.staged_size
    }

    /// Bytes moved by the last recorded copy
    pub fn device_size(&self) -> vk::DeviceSize {
        self.device_size
    }

    /// Whether staged data changed since the last recorded copy
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Device-local target buffer
    pub fn device_buffer(&self) -> &AllocatedBuffer {
        &self.device_buffer
    }

    /// Device address of the target buffer
    ///
    /// Reading it while staged data has not been copied yet means shaders see stale data;
    /// that is logged.
    pub fn device_address(&self) -> vk::DeviceAddress {
        if self.dirty {
            log::warn!(
                "Device address of {:?} read with {} staged bytes not yet copied",
                self.device_buffer.handle(),
                self.staged_size
            );
        }
        self.device_buffer.device_address()
    }

    fn staging(&self) -> &[u8] {
        self.staging_buffer.mapped_bytes().unwrap_or_default()
    }

    fn staging_mut(&mut self) -> &mut [u8] {
        self.staging_buffer.mapped_bytes_mut().unwrap_or_default()
    }

    /// Replace the staged contents with `bytes`
    ///
    /// # Panics
    /// If `bytes` is larger than the staging capacity.
    pub fn stage(&mut self, bytes: &[u8]) {
        assert!(
            bytes.len() <= self.staging_capacity(),
            "staging {} bytes into a buffer of {} bytes",
            bytes.len(),
            self.staging_capacity()
        );
        self.staging_mut()[..bytes.len()].copy_from_slice(bytes);
        self.staged_size = bytes.len();
        self.dirty = true;
    }

    /// Append `bytes` after the currently staged data
    ///
    /// Returns `false` and stages nothing if the bytes do not fit.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        let start = self.staged_size;
        let end = start + bytes.len();
        if end > self.staging_capacity() {
            log::warn!(
                "Rejected push of {} bytes: {} of {} bytes already staged",
                bytes.len(),
                start,
                self.staging_capacity()
            );
            return false;
        }
        self.staging_mut()[start..end].copy_from_slice(bytes);
        self.staged_size = end;
        self.dirty = true;
        true
    }

    /// Drop the last `count` staged bytes, clamped at zero
    pub fn pop(&mut self, count: usize) {
        self.staged_size = self.staged_size.saturating_sub(count);
        self.dirty = true;
    }

    /// Forget all staged bytes; device data is untouched
    pub fn clear_staged(&mut self) {
        self.staged_size = 0;
        self.dirty = true;
    }

    /// Staged bytes
    pub fn read_staged_bytes(&self) -> &[u8] {
        &self.staging()[..self.staged_size]
    }

    /// Staged bytes, for in-place edits
    pub fn map_staged_bytes(&mut self) -> &mut [u8] {
        self.dirty = true;
        let staged = self.staged_size;
        &mut self.staging_mut()[..staged]
    }

    /// Flush staged data and record the copy into the target buffer
    ///
    /// Must precede, in the same command buffer, every read of the target this frame.
    pub fn record_copy_to_device(&mut self, recorder: &mut CommandRecorder<'_>) -> VulkanResult<()> {
        let size = self.staged_size as vk::DeviceSize;
        if size > 0 {
            self.staging_buffer.flush(0, size)?;
            recorder.copy_buffer(self.staging_buffer.handle(), self.device_buffer.handle(), size);
        }
        self.device_size = size;
        self.dirty = false;
        Ok(())
    }

    /// Barrier from the recorded copy to reads at `dst_stage` / `dst_access`
    ///
    /// Covers the tracked device size; nothing is recorded when no bytes were copied.
    pub fn record_total_copy_barrier(
        &self,
        recorder: &mut CommandRecorder<'_>,
        dst_stage: vk::PipelineStageFlags2,
        dst_access: vk::AccessFlags2,
    ) {
        if self.device_size == 0 {
            return;
        }
        let barrier = vk::BufferMemoryBarrier2::builder()
            .src_stage_mask(vk::PipelineStageFlags2::COPY)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(self.device_buffer.handle())
            .offset(0)
            .size(self.device_size)
            .build();
        recorder.pipeline_barrier(&[], &[barrier], &[]);
    }
}

/// [`StagedBuffer`] holding an array of `T`
#[derive(Debug)]
pub struct TypedStagedBuffer<T: bytemuck::Pod> {
    inner: StagedBuffer,
    _marker: PhantomData<T>,
}

impl<T: bytemuck::Pod> TypedStagedBuffer<T> {
    const STRIDE: usize = std::mem::size_of::<T>();

    /// Allocate room for `capacity` elements
    pub fn allocate(
        device: &dyn GpuDevice,
        allocator: &Arc<dyn MemoryAllocator>,
        capacity: usize,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        let bytes = (capacity.max(1) * Self::STRIDE) as vk::DeviceSize;
        Ok(Self {
            inner: StagedBuffer::allocate(device, allocator, bytes, usage)?,
            _marker: PhantomData,
        })
    }

    /// Element capacity
    pub fn capacity(&self) -> usize {
        self.inner.staging_capacity() / Self::STRIDE
    }

    /// Number of staged elements
    pub fn len(&self) -> usize {
        self.inner.staged_size() / Self::STRIDE
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace staged contents
    ///
    /// # Panics
    /// If `values` exceeds the capacity.
    pub fn overwrite_staged(&mut self, values: &[T]) {
        self.inner.stage(bytemuck::cast_slice(values));
    }

    /// Append elements; all-or-nothing
    pub fn push_staged(&mut self, values: &[T]) -> bool {
        self.inner.push(bytemuck::cast_slice(values))
    }

    /// Drop the last `count` elements, clamped at zero
    pub fn pop_staged(&mut self, count: usize) {
        self.inner.pop(count.saturating_mul(Self::STRIDE));
    }

    /// Forget all staged elements
    pub fn clear_staged(&mut self) {
        self.inner.clear_staged();
    }

    /// Staged elements
    pub fn read_staged(&self) -> &[T] {
        bytemuck::cast_slice(self.inner.read_staged_bytes())
    }

    /// Staged elements, for in-place edits between frames
    pub fn map_staged(&mut self) -> &mut [T] {
        bytemuck::cast_slice_mut(self.inner.map_staged_bytes())
    }

    /// Untyped view
    pub fn raw(&self) -> &StagedBuffer {
        &self.inner
    }

    /// Device address of the target buffer
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.inner.device_address()
    }

    /// See [`StagedBuffer::record_copy_to_device`]
    pub fn record_copy_to_device(&mut self, recorder: &mut CommandRecorder<'_>) -> VulkanResult<()> {
        self.inner.record_copy_to_device(recorder)
    }

    /// See [`StagedBuffer::record_total_copy_barrier`]
    pub fn record_total_copy_barrier(
        &self,
        recorder: &mut CommandRecorder<'_>,
        dst_stage: vk::PipelineStageFlags2,
        dst_access: vk::AccessFlags2,
    ) {
        self.inner.record_total_copy_barrier(recorder, dst_stage, dst_access);
    }
}
