//! Blocking one-off submissions
//!
//! Setup work outside the frame loop (mesh uploads, initial clears) is recorded into a
//! dedicated command buffer, submitted, and waited on before returning. `&mut self` makes the
//! path non-reentrant: only one immediate submission is ever in flight.

use ash::vk;
use std::sync::Arc;

use super::sync::Fence;
use crate::render::backends::vulkan::device::{GpuDevice, QueueSubmission};
use crate::render::backends::vulkan::error::VulkanResult;
use crate::render::backends::vulkan::rendering::commands::CommandRecorder;

/// Single-slot synchronous submission path
pub struct ImmediateSubmitter {
    device: Arc<dyn GpuDevice>,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: Fence,
    timeout_ns: u64,
}

impl ImmediateSubmitter {
    /// Create the pool, buffer and fence; waits are bounded by `timeout_ns`
    pub fn new(device: &Arc<dyn GpuDevice>, timeout_ns: u64) -> VulkanResult<Self> {
        let command_pool = device.create_command_pool()?;
        let command_buffer = match device.allocate_command_buffer(command_pool) {
            Ok(buffer) => buffer,
            Err(err) => {
                device.destroy_command_pool(command_pool);
                return Err(err);
            }
        };
        let fence = match Fence::new(device, true) {
            Ok(fence) => fence,
            Err(err) => {
                device.destroy_command_pool(command_pool);
                return Err(err);
            }
        };

        Ok(Self {
            device: Arc::clone(device),
            command_pool,
            command_buffer,
            fence,
            timeout_ns,
        })
    }

    /// Record commands with `record`, submit them and block until they complete
    pub fn submit<F>(&mut self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder<'_>) -> VulkanResult<()>,
    {
        self.fence.reset()?;
        self.device.reset_command_buffer(self.command_buffer)?;
        self.device.begin_command_buffer(self.command_buffer)?;

        let mut recorder = CommandRecorder::new(self.device.as_ref(), self.command_buffer);
        record(&mut recorder)?;

        self.device.end_command_buffer(self.command_buffer)?;
        self.device.queue_submit(&QueueSubmission {
            command_buffer: self.command_buffer,
            wait: None,
            signal: None,
            fence: self.fence.handle(),
        })?;
        self.fence.wait(self.timeout_ns)
    }
}

impl Drop for ImmediateSubmitter {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.command_pool);
    }
}
