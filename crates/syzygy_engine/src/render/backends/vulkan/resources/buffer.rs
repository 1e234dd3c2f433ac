//! GPU buffer ownership
//!
//! [`AllocatedBuffer`] owns one buffer handle and the allocation behind it. It is move-only and
//! destroyed exactly once when dropped.

use ash::vk;
use std::ptr::NonNull;
use std::sync::Arc;

use super::allocator::{AllocationId, MemoryAllocator, MemoryPolicy};
use crate::render::backends::vulkan::device::GpuDevice;
use crate::render::backends::vulkan::error::{VulkanError, VulkanResult};

/// A buffer plus its memory allocation
pub struct AllocatedBuffer {
    allocator: Arc<dyn MemoryAllocator>,
    buffer: vk::Buffer,
    allocation: Option<AllocationId>,
    size: vk::DeviceSize,
    mapped: Option<NonNull<u8>>,
    device_address: Option<vk::DeviceAddress>,
}

impl AllocatedBuffer {
    /// Allocate a buffer of `size` bytes
    ///
    /// When `usage` contains `SHADER_DEVICE_ADDRESS` the address is queried once here and cached.
    pub fn allocate(
        device: &dyn GpuDevice,
        allocator: &Arc<dyn MemoryAllocator>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        policy: MemoryPolicy,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("zero-sized buffer with usage {usage:?}"),
            });
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();
        let allocated = allocator.create_buffer(&buffer_info, policy)?;

        if policy.mapped && allocated.mapped.is_none() {
            allocator.destroy_buffer(allocated.buffer, allocated.allocation);
            return Err(VulkanError::InvalidOperation {
                reason: format!("allocation of {size} bytes requested mapped memory but has no host pointer"),
            });
        }

        let device_address = usage
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
            .then(|| device.buffer_device_address(allocated.buffer));

        log::trace!("Allocated buffer {:?} ({} bytes, {:?})", allocated.buffer, size, usage);
        Ok(Self {
            allocator: Arc::clone(allocator),
            buffer: allocated.buffer,
            allocation: Some(allocated.allocation),
            size,
            mapped: allocated.mapped,
            device_address,
        })
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Cached device address, if the buffer was created with address support
    pub fn try_device_address(&self) -> Option<vk::DeviceAddress> {
        self.device_address
    }

    /// Cached device address
    ///
    /// Reading the address of a buffer created without address support is a logic error; it is
    /// logged and `0` is returned.
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_address.unwrap_or_else(|| {
            log::warn!(
                "Device address read from buffer {:?} that was created without SHADER_DEVICE_ADDRESS",
                self.buffer
            );
            0
        })
    }

    /// Whether the allocation is persistently mapped
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Mapped memory, for host-visible buffers
    pub fn mapped_bytes(&self) -> Option<&[u8]> {
        // SAFETY: the mapping covers `size` bytes and lives as long as the allocation
        self.mapped
            .map(|ptr| unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size as usize) })
    }

    /// Mutable mapped memory, for host-visible buffers
    pub fn mapped_bytes_mut(&mut self) -> Option<&mut [u8]> {
        // SAFETY: as above, and `&mut self` guarantees exclusive host access
        self.mapped
            .map(|ptr| unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.size as usize) })
    }

    /// Copy `bytes` into mapped memory at `offset`
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> VulkanResult<()> {
        let buffer = self.buffer;
        let Some(mapped) = self.mapped_bytes_mut() else {
            return Err(VulkanError::InvalidOperation {
                reason: format!("host write to unmapped buffer {buffer:?}"),
            });
        };
        let end = offset + bytes.len();
        if end > mapped.len() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("host write of {} bytes at {offset} overruns buffer {buffer:?} of {} bytes", bytes.len(), mapped.len()),
            });
        }
        mapped[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Make host writes in `offset..offset + size` visible to the device
    pub fn flush(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()> {
        match self.allocation {
            Some(allocation) if size > 0 => self.allocator.flush(allocation, offset, size),
            _ => Ok(()),
        }
    }
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.allocator.destroy_buffer(self.buffer, allocation);
            self.buffer = vk::Buffer::null();
            self.mapped = None;
        }
    }
}

impl std::fmt::Debug for AllocatedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocatedBuffer")
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .field("mapped", &self.mapped.is_some())
            .field("device_address", &self.device_address)
            .finish()
    }
}
