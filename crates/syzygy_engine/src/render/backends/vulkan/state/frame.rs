//! Frames-in-flight ring
//!
//! Each slot owns a command pool and buffer, an image-acquired semaphore, a render-complete
//! semaphore, a render fence and a deletion queue. The slot for frame `n` is `n % N`. The CPU
//! only touches a slot's command buffer after that slot's fence has signaled, which is what
//! keeps it from rewriting commands the GPU may still be executing.
//!
//! ```text
//!   Idle --start_recording--> Recording --submit--> Submitted --wait_and_flush--> Idle
//! ```

use ash::vk;
use std::sync::Arc;

use super::deletion_queue::DeletionQueue;
use super::sync::{Fence, Semaphore};
use crate::render::backends::vulkan::device::{GpuDevice, QueueSubmission};
use crate::render::backends::vulkan::error::{VulkanError, VulkanResult};

/// Where a slot is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSlotState {
    /// Fence signaled; safe to record
    Idle,
    /// The CPU is building the command buffer
    Recording,
    /// Handed to the GPU; the fence is unsignaled until it finishes
    Submitted,
}

/// Resources of one frame slot
pub struct FrameData {
    device: Arc<dyn GpuDevice>,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    image_acquired: Semaphore,
    render_complete: Semaphore,
    render_fence: Fence,
    deletion_queue: DeletionQueue,
    state: FrameSlotState,
}

impl FrameData {
    fn new(device: &Arc<dyn GpuDevice>) -> VulkanResult<Self> {
        let command_pool = device.create_command_pool()?;
        let command_buffer = match device.allocate_command_buffer(command_pool) {
            Ok(buffer) => buffer,
            Err(err) => {
                device.destroy_command_pool(command_pool);
                return Err(err);
            }
        };

        Ok(Self {
            device: Arc::clone(device),
            command_pool,
            command_buffer,
            image_acquired: Semaphore::new(device)?,
            render_complete: Semaphore::new(device)?,
            // Signaled so the very first wait returns immediately
            render_fence: Fence::new(device, true)?,
            deletion_queue: DeletionQueue::new(),
            state: FrameSlotState::Idle,
        })
    }

    /// Command buffer of this slot
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Semaphore signaled when the acquired swapchain image is ready
    pub fn image_acquired(&self) -> vk::Semaphore {
        self.image_acquired.handle()
    }

    /// Semaphore signaled when this slot's rendering completes
    pub fn render_complete(&self) -> vk::Semaphore {
        self.render_complete.handle()
    }

    /// Fence signaled when this slot's submission completes
    pub fn render_fence(&self) -> vk::Fence {
        self.render_fence.handle()
    }

    /// Current lifecycle state
    pub fn state(&self) -> FrameSlotState {
        self.state
    }

    /// Cleanup actions released the next time this slot is reused
    pub fn deletion_queue(&mut self) -> &mut DeletionQueue {
        &mut self.deletion_queue
    }

    /// Wait for the slot's previous submission, then run its deferred deletions
    pub fn wait_and_flush(&mut self, timeout_ns: u64) -> VulkanResult<()> {
        self.render_fence.wait(timeout_ns)?;
        self.state = FrameSlotState::Idle;
        self.deletion_queue.flush();
        Ok(())
    }

    /// Reset fence and command buffer and begin recording
    pub fn start_recording(&mut self) -> VulkanResult<vk::CommandBuffer> {
        if self.state != FrameSlotState::Idle {
            return Err(VulkanError::InvalidOperation {
                reason: format!("frame slot reset while {:?}", self.state),
            });
        }
        self.render_fence.reset()?;
        self.device.reset_command_buffer(self.command_buffer)?;
        self.device.begin_command_buffer(self.command_buffer)?;
        self.state = FrameSlotState::Recording;
        Ok(self.command_buffer)
    }

    /// End recording and submit
    ///
    /// Waits on the image-acquired semaphore at colour attachment output and signals the
    /// render-complete semaphore and the render fence.
    pub fn submit(&mut self) -> VulkanResult<()> {
        if self.state != FrameSlotState::Recording {
            return Err(VulkanError::InvalidOperation {
                reason: format!("frame slot submitted while {:?}", self.state),
            });
        }
        self.device.end_command_buffer(self.command_buffer)?;
        self.device.queue_submit(&QueueSubmission {
            command_buffer: self.command_buffer,
            wait: Some((
                self.image_acquired.handle(),
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            )),
            signal: Some((
                self.render_complete.handle(),
                vk::PipelineStageFlags2::ALL_GRAPHICS,
            )),
            fence: self.render_fence.handle(),
        })?;
        self.state = FrameSlotState::Submitted;
        Ok(())
    }
}

impl Drop for FrameData {
    fn drop(&mut self) {
        self.deletion_queue.flush();
        self.device.destroy_command_pool(self.command_pool);
    }
}

/// Fixed ring of frame slots
pub struct FrameRing {
    frames: Vec<FrameData>,
    frame_number: u64,
    fence_timeout_ns: u64,
}

impl FrameRing {
    /// Create `frames_in_flight` slots
    pub fn new(device: &Arc<dyn GpuDevice>, frames_in_flight: usize, fence_timeout_ns: u64) -> VulkanResult<Self> {
        if frames_in_flight == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "frame ring needs at least one slot".to_string(),
            });
        }
        let frames = (0..frames_in_flight)
            .map(|_| FrameData::new(device))
            .collect::<VulkanResult<Vec<_>>>()?;

        log::debug!("Created frame ring with {frames_in_flight} slots");
        Ok(Self {
            frames,
            frame_number: 0,
            fence_timeout_ns,
        })
    }

    /// Number of frames advanced so far
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Number of slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Index of the current slot
    pub fn slot_index(&self) -> usize {
        (self.frame_number % self.frames.len() as u64) as usize
    }

    /// Current slot
    pub fn current(&self) -> &FrameData {
        &self.frames[self.slot_index()]
    }

    /// Current slot, mutably
    pub fn current_mut(&mut self) -> &mut FrameData {
        let index = self.slot_index();
        &mut self.frames[index]
    }

    /// Slot of the most recently submitted frame, mutably
    ///
    /// Its deletion queue runs only after that frame has finished, which makes it the place
    /// to retire objects the last recorded frame may still reference.
    pub fn previous_mut(&mut self) -> &mut FrameData {
        let count = self.frames.len();
        let index = (self.slot_index() + count - 1) % count;
        &mut self.frames[index]
    }

    /// Wait on the current slot's fence and flush its deletion queue
    pub fn begin_slot(&mut self) -> VulkanResult<&mut FrameData> {
        let timeout = self.fence_timeout_ns;
        let frame = self.current_mut();
        frame.wait_and_flush(timeout)?;
        Ok(frame)
    }

    /// Move on to the next slot
    pub fn advance(&mut self) {
        debug_assert_ne!(self.current().state(), FrameSlotState::Recording);
        self.frame_number += 1;
    }

    /// Wait for every submitted slot and flush all deletion queues
    pub fn wait_all(&mut self) -> VulkanResult<()> {
        let timeout = self.fence_timeout_ns;
        for frame in &mut self.frames {
            if frame.state() == FrameSlotState::Submitted {
                frame.wait_and_flush(timeout)?;
            } else {
                frame.deletion_queue.flush();
            }
        }
        Ok(())
    }
}
