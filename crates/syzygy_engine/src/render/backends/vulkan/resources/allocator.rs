//! GPU memory allocation
//!
//! [`MemoryAllocator`] is the allocation half of the graphics binding: it creates buffers and
//! images together with their backing memory. [`VmaAllocator`] implements it on top of the
//! Vulkan Memory Allocator. Allocations are referred to by [`AllocationId`] so that owners do
//! not depend on the allocator's own handle types.

use ash::vk;
use slotmap::SlotMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};
use vk_mem::Alloc;

use crate::render::backends::vulkan::error::{VkResultExt, VulkanError, VulkanResult};
use crate::render::backends::vulkan::device::GpuDevice;

slotmap::new_key_type! {
    /// Key of one live allocation inside a [`MemoryAllocator`]
    pub struct AllocationId;
}

/// Where an allocation should live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUsage {
    /// Device-local memory, not host accessible
    DeviceLocal,
    /// Host-visible memory written sequentially by the CPU (staging, uploads)
    HostUpload,
    /// Host-visible memory read back by the CPU
    HostReadback,
}

/// Memory placement policy for one allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPolicy {
    /// Memory usage class
    pub usage: MemoryUsage,
    /// Keep the allocation persistently mapped
    pub mapped: bool,
}

impl MemoryPolicy {
    /// Device-local, unmapped
    pub const DEVICE_LOCAL: Self = Self { usage: MemoryUsage::DeviceLocal, mapped: false };
    /// Host-visible upload memory, persistently mapped
    pub const HOST_UPLOAD_MAPPED: Self = Self { usage: MemoryUsage::HostUpload, mapped: true };
    /// Host-visible readback memory, persistently mapped
    pub const HOST_READBACK_MAPPED: Self = Self { usage: MemoryUsage::HostReadback, mapped: true };
}

/// A buffer and the allocation backing it
#[derive(Debug)]
pub struct BufferAllocation {
    /// Buffer handle
    pub buffer: vk::Buffer,
    /// Allocation backing the buffer
    pub allocation: AllocationId,
    /// Host pointer when the allocation is persistently mapped
    pub mapped: Option<NonNull<u8>>,
}

/// An image and the allocation backing it
#[derive(Debug)]
pub struct ImageAllocation {
    /// Image handle
    pub image: vk::Image,
    /// Allocation backing the image
    pub allocation: AllocationId,
}

/// Allocation half of the graphics binding
pub trait MemoryAllocator {
    /// Create a buffer with memory placed according to `policy`
    fn create_buffer(&self, info: &vk::BufferCreateInfo, policy: MemoryPolicy) -> VulkanResult<BufferAllocation>;
    /// Destroy a buffer and free its memory
    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: AllocationId);
    /// Make host writes in `offset..offset + size` visible to the device
    fn flush(&self, allocation: AllocationId, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()>;
    /// Create an image with memory placed according to `policy`
    fn create_image(&self, info: &vk::ImageCreateInfo, policy: MemoryPolicy) -> VulkanResult<ImageAllocation>;
    /// Destroy an image and free its memory
    fn destroy_image(&self, image: vk::Image, allocation: AllocationId);
}

/// [`MemoryAllocator`] backed by the Vulkan Memory Allocator
pub struct VmaAllocator {
    allocations: Mutex<SlotMap<AllocationId, vk_mem::Allocation>>,
    allocator: vk_mem::Allocator,
    // Keeps the logical device alive for as long as the allocator exists
    _device: Arc<dyn GpuDevice>,
}

impl VmaAllocator {
    /// Create the allocator with buffer device address support enabled
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        owner: Arc<dyn GpuDevice>,
    ) -> VulkanResult<Self> {
        let create_info = vk_mem::AllocatorCreateInfo::new(instance, device, physical_device)
            .flags(vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS)
            .vulkan_api_version(vk::API_VERSION_1_3);

        let allocator = vk_mem::Allocator::new(create_info).context("vmaCreateAllocator")?;

        log::debug!("Created VMA allocator");
        Ok(Self {
            allocations: Mutex::new(SlotMap::with_key()),
            allocator,
            _device: owner,
        })
    }

    fn create_info(policy: MemoryPolicy) -> vk_mem::AllocationCreateInfo {
        let (usage, mut flags) = match policy.usage {
            MemoryUsage::DeviceLocal => (vk_mem::MemoryUsage::AutoPreferDevice, vk_mem::AllocationCreateFlags::empty()),
            MemoryUsage::HostUpload => (
                vk_mem::MemoryUsage::AutoPreferHost,
                vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ),
            MemoryUsage::HostReadback => (
                vk_mem::MemoryUsage::AutoPreferHost,
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            ),
        };
        if policy.mapped {
            flags |= vk_mem::AllocationCreateFlags::MAPPED;
        }

        vk_mem::AllocationCreateInfo {
            usage,
            flags,
            ..Default::default()
        }
    }

    fn insert(&self, allocation: vk_mem::Allocation) -> AllocationId {
        let mut allocations = self
            .allocations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        allocations.insert(allocation)
    }

    fn remove(&self, id: AllocationId) -> Option<vk_mem::Allocation> {
        let mut allocations = self
            .allocations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        allocations.remove(id)
    }
}

impl MemoryAllocator for VmaAllocator {
    fn create_buffer(&self, info: &vk::BufferCreateInfo, policy: MemoryPolicy) -> VulkanResult<BufferAllocation> {
        let create_info = Self::create_info(policy);
        let (buffer, allocation) = unsafe { self.allocator.create_buffer(info, &create_info) }.map_err(|result| {
            if result == vk::Result::ERROR_OUT_OF_DEVICE_MEMORY || result == vk::Result::ERROR_OUT_OF_HOST_MEMORY {
                VulkanError::OutOfMemory { requested: info.size }
            } else {
                VulkanError::call("vmaCreateBuffer", result)
            }
        })?;

        let mapped = if policy.mapped {
            let allocation_info = self.allocator.get_allocation_info(&allocation);
            NonNull::new(allocation_info.mapped_data.cast::<u8>())
        } else {
            None
        };

        Ok(BufferAllocation {
            buffer,
            allocation: self.insert(allocation),
            mapped,
        })
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: AllocationId) {
        match self.remove(allocation) {
            Some(mut allocation) => unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) },
            None => log::error!("Destroying buffer {buffer:?} with unknown allocation {allocation:?}"),
        }
    }

    fn flush(&self, allocation: AllocationId, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()> {
        let allocations = self
            .allocations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(allocation) = allocations.get(allocation) else {
            return Err(VulkanError::InvalidOperation {
                reason: format!("flush of unknown allocation {allocation:?}"),
            });
        };
        self.allocator
            .flush_allocation(allocation, offset as usize, size as usize)
            .context("vmaFlushAllocation")
    }

    fn create_image(&self, info: &vk::ImageCreateInfo, policy: MemoryPolicy) -> VulkanResult<ImageAllocation> {
        let create_info = Self::create_info(policy);
        let (image, allocation) = unsafe { self.allocator.create_image(info, &create_info) }.map_err(|result| {
            if result == vk::Result::ERROR_OUT_OF_DEVICE_MEMORY || result == vk::Result::ERROR_OUT_OF_HOST_MEMORY {
                let texels = u64::from(info.extent.width) * u64::from(info.extent.height) * u64::from(info.extent.depth);
                VulkanError::OutOfMemory { requested: texels }
            } else {
                VulkanError::call("vmaCreateImage", result)
            }
        })?;

        Ok(ImageAllocation {
            image,
            allocation: self.insert(allocation),
        })
    }

    fn destroy_image(&self, image: vk::Image, allocation: AllocationId) {
        match self.remove(allocation) {
            Some(mut allocation) => unsafe { self.allocator.destroy_image(image, &mut allocation) },
            None => log::error!("Destroying image {image:?} with unknown allocation {allocation:?}"),
        }
    }
}

impl Drop for VmaAllocator {
    fn drop(&mut self) {
        let allocations = self
            .allocations
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !allocations.is_empty() {
            log::warn!("VMA allocator dropped with {} live allocations", allocations.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_local_policy_is_unmapped() {
        let info = VmaAllocator::create_info(MemoryPolicy::DEVICE_LOCAL);
        assert!(matches!(info.usage, vk_mem::MemoryUsage::AutoPreferDevice));
        assert!(!info.flags.contains(vk_mem::AllocationCreateFlags::MAPPED));
    }

    #[test]
    fn test_host_policies_request_host_access() {
        let upload = VmaAllocator::create_info(MemoryPolicy::HOST_UPLOAD_MAPPED);
        assert!(matches!(upload.usage, vk_mem::MemoryUsage::AutoPreferHost));
        assert!(upload
            .flags
            .contains(vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE | vk_mem::AllocationCreateFlags::MAPPED));

        let readback = VmaAllocator::create_info(MemoryPolicy::HOST_READBACK_MAPPED);
        assert!(readback
            .flags
            .contains(vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM | vk_mem::AllocationCreateFlags::MAPPED));
    }
}
