//! Swapchain ownership
//!
//! Owns the swapchain, one view per image and the tracked layout of each image. Swapchain
//! images change layout only through [`Swapchain::record_transition`].

use ash::vk;
use std::sync::Arc;

use crate::render::backends::vulkan::device::{
    AcquireOutcome, GpuDevice, ImageViewDesc, PresentOutcome, SwapchainImages,
};
use crate::render::backends::vulkan::error::VulkanResult;
use crate::render::backends::vulkan::rendering::commands::CommandRecorder;
use crate::render::backends::vulkan::resources::image::record_layout_transition;

/// Swapchain plus per-image views and layouts
pub struct Swapchain {
    device: Arc<dyn GpuDevice>,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    layouts: Vec<vk::ImageLayout>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain of `extent`
    pub fn new(device: &Arc<dyn GpuDevice>, extent: vk::Extent2D) -> VulkanResult<Self> {
        let created = device.create_swapchain(extent, vk::SwapchainKHR::null())?;
        Self::from_images(device, created)
    }

    fn from_images(device: &Arc<dyn GpuDevice>, created: SwapchainImages) -> VulkanResult<Self> {
        let mut swapchain = Self {
            device: Arc::clone(device),
            handle: created.handle,
            layouts: vec![vk::ImageLayout::UNDEFINED; created.images.len()],
            views: Vec::with_capacity(created.images.len()),
            images: created.images,
            format: created.format,
            extent: created.extent,
        };
        // Pushed one at a time so Drop releases whatever was created on failure
        for index in 0..swapchain.images.len() {
            let view = device.create_image_view(&ImageViewDesc {
                image: swapchain.images[index],
                format: swapchain.format,
                aspect: vk::ImageAspectFlags::COLOR,
                view_type: vk::ImageViewType::TYPE_2D,
            })?;
            swapchain.views.push(view);
        }

        log::info!(
            "Swapchain created: {}x{} {:?}, {} images",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.format,
            swapchain.images.len()
        );
        Ok(swapchain)
    }

    /// Replace this swapchain with one of `extent`
    ///
    /// The device must be idle; the old swapchain is handed to the driver for reuse and then
    /// destroyed along with its views.
    pub fn recreate(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        let created = self.device.create_swapchain(extent, self.handle)?;
        let replacement = Self::from_images(&self.device, created)?;
        // Dropping the previous value releases the old views and swapchain
        drop(std::mem::replace(self, replacement));
        Ok(())
    }

    /// Swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    /// Image format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Image at `index`
    pub fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    /// View of the image at `index`
    pub fn view(&self, index: u32) -> vk::ImageView {
        self.views[index as usize]
    }

    /// Tracked layout of the image at `index`
    pub fn layout(&self, index: u32) -> vk::ImageLayout {
        self.layouts[index as usize]
    }

    /// Acquire the next image, signaling `semaphore` when it is ready
    pub fn acquire(&self, semaphore: vk::Semaphore, timeout_ns: u64) -> VulkanResult<AcquireOutcome> {
        self.device.acquire_next_image(self.handle, semaphore, timeout_ns)
    }

    /// Present the image at `index` after `wait` is signaled
    pub fn present(&self, index: u32, wait: vk::Semaphore) -> VulkanResult<PresentOutcome> {
        self.device.queue_present(self.handle, index, wait)
    }

    /// Record a transition of image `index` from its tracked layout to `new_layout`
    pub fn record_transition(&mut self, recorder: &mut CommandRecorder<'_>, index: u32, new_layout: vk::ImageLayout) {
        let slot = index as usize;
        record_layout_transition(
            recorder,
            &[self.images[slot]],
            self.layouts[slot],
            new_layout,
            vk::ImageAspectFlags::COLOR,
        );
        self.layouts[slot] = new_layout;
    }

    /// Treat the contents of image `index` as discardable; the next transition starts from `UNDEFINED`
    pub fn discard_contents(&mut self, index: u32) {
        self.layouts[index as usize] = vk::ImageLayout::UNDEFINED;
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        for view in self.views.drain(..) {
            self.device.destroy_image_view(view);
        }
        self.device.destroy_swapchain(self.handle);
    }
}
