//! Synchronization primitives for GPU/CPU coordination
//!
//! RAII wrappers for fences (CPU waits on GPU) and binary semaphores (GPU waits on GPU).

use ash::vk;
use std::sync::Arc;

use crate::render::backends::vulkan::device::GpuDevice;
use crate::render::backends::vulkan::error::VulkanResult;

/// GPU-GPU synchronization primitive with automatic cleanup
///
/// Signaled by one queue operation and waited on by another, e.g. image acquisition
/// before colour output, rendering before presentation.
pub struct Semaphore {
    device: Arc<dyn GpuDevice>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a binary semaphore
    pub fn new(device: &Arc<dyn GpuDevice>) -> VulkanResult<Self> {
        Ok(Self {
            semaphore: device.create_semaphore()?,
            device: Arc::clone(device),
        })
    }

    /// Semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
    }
}

/// CPU-GPU synchronization primitive with automatic cleanup
pub struct Fence {
    device: Arc<dyn GpuDevice>,
    fence: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally already signaled
    pub fn new(device: &Arc<dyn GpuDevice>, signaled: bool) -> VulkanResult<Self> {
        Ok(Self {
            fence: device.create_fence(signaled)?,
            device: Arc::clone(device),
        })
    }

    /// Fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Block until signaled; expiry of `timeout_ns` is a fatal error
    pub fn wait(&self, timeout_ns: u64) -> VulkanResult<()> {
        self.device.wait_for_fence(self.fence, timeout_ns)
    }

    /// Return to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        self.device.reset_fence(self.fence)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::error::VulkanError;
    use crate::render::backends::vulkan::testing::MockGpu;

    #[test]
    fn test_unsignaled_fence_times_out() {
        let gpu = MockGpu::new();
        let fence = Fence::new(&gpu.device, false).unwrap();

        let err = fence.wait(1_000).unwrap_err();
        assert!(matches!(err, VulkanError::FenceTimeout { timeout_ns: 1_000, .. }));
    }

    #[test]
    fn test_signaled_fence_waits_immediately() {
        let gpu = MockGpu::new();
        let fence = Fence::new(&gpu.device, true).unwrap();
        fence.wait(1_000).unwrap();
        fence.reset().unwrap();
        assert!(!gpu.mock.is_fence_signaled(fence.handle()));
    }

    #[test]
    fn test_sync_objects_destroyed_on_drop() {
        let gpu = MockGpu::new();
        {
            let _fence = Fence::new(&gpu.device, true).unwrap();
            let _semaphore = Semaphore::new(&gpu.device).unwrap();
        }
        assert_eq!(gpu.mock.live("fence"), 0);
        assert_eq!(gpu.mock.live("semaphore"), 0);
    }
}
