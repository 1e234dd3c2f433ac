//! Off-screen render targets sized to the swapchain
//!
//! The draw image collects the final HDR colour and is blitted to the swapchain. The depth
//! image is shared by the G-buffer pass and the debug lines. The four G-buffer images hold
//! diffuse, specular, normal and world position.

use ash::vk;
use std::sync::Arc;

use super::pipelines::GBufferTargets;
use crate::render::backends::vulkan::{
    AllocatedImage, CommandRecorder, DescriptorAllocator, DescriptorLayoutBuilder, DescriptorSetLayout,
    DescriptorWriter, GpuDevice, ImageDesc, MemoryAllocator, PoolSizeRatio, VulkanResult,
};

/// HDR colour format of the draw image
pub const DRAW_IMAGE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// Depth format of the scene depth image
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
/// Formats of the diffuse, specular, normal and position G-buffer images
pub const GBUFFER_FORMATS: [vk::Format; 4] = [
    vk::Format::R16G16B16A16_SFLOAT,
    vk::Format::R16G16B16A16_SFLOAT,
    vk::Format::R16G16B16A16_SFLOAT,
    vk::Format::R32G32B32A32_SFLOAT,
];
/// Binding of the draw image in the G-buffer set
pub const GBUFFER_DRAW_IMAGE_BINDING: u32 = 4;

/// Draw image, depth and G-buffer with their descriptor sets
pub struct DrawTargets {
    device: Arc<dyn GpuDevice>,
    allocator: Arc<dyn MemoryAllocator>,
    descriptors: DescriptorAllocator,
    draw_image_layout: DescriptorSetLayout,
    gbuffer_layout: DescriptorSetLayout,
    draw_image_set: vk::DescriptorSet,
    gbuffer_set: vk::DescriptorSet,
    draw_image: AllocatedImage,
    depth_image: AllocatedImage,
    gbuffer: [AllocatedImage; 4],
    extent: vk::Extent2D,
}

impl DrawTargets {
    /// Allocate every target at `extent` and write their descriptor sets
    pub fn new(
        device: &Arc<dyn GpuDevice>,
        allocator: &Arc<dyn MemoryAllocator>,
        extent: vk::Extent2D,
        max_sets: u32,
        ratios: &[PoolSizeRatio],
    ) -> VulkanResult<Self> {
        let compute = vk::ShaderStageFlags::COMPUTE;
        let draw_image_layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE, compute)
            .build(device, vk::DescriptorSetLayoutCreateFlags::empty())?;
        let mut gbuffer_builder = DescriptorLayoutBuilder::new();
        for binding in 0..=GBUFFER_DRAW_IMAGE_BINDING {
            gbuffer_builder = gbuffer_builder.add_binding(binding, vk::DescriptorType::STORAGE_IMAGE, compute);
        }
        let gbuffer_layout = gbuffer_builder.build(device, vk::DescriptorSetLayoutCreateFlags::empty())?;

        let descriptors = DescriptorAllocator::create(
            device,
            max_sets.max(2),
            ratios,
            vk::DescriptorPoolCreateFlags::empty(),
        )?;
        let (draw_image, depth_image, gbuffer) = allocate_images(device, allocator, extent)?;

        let mut targets = Self {
            device: Arc::clone(device),
            allocator: Arc::clone(allocator),
            descriptors,
            draw_image_layout,
            gbuffer_layout,
            draw_image_set: vk::DescriptorSet::null(),
            gbuffer_set: vk::DescriptorSet::null(),
            draw_image,
            depth_image,
            gbuffer,
            extent,
        };
        targets.write_descriptors()?;
        Ok(targets)
    }

    /// Reallocate every target at `extent` and rewrite the descriptor sets
    ///
    /// The caller must have waited for the device to go idle.
    pub fn resize(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        let (draw_image, depth_image, gbuffer) = allocate_images(&self.device, &self.allocator, extent)?;
        self.draw_image = draw_image;
        self.depth_image = depth_image;
        self.gbuffer = gbuffer;
        self.extent = extent;
        self.write_descriptors()?;
        log::debug!("Draw targets resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn write_descriptors(&mut self) -> VulkanResult<()> {
        self.descriptors.clear_descriptors()?;
        self.draw_image_set = self.descriptors.allocate(&self.draw_image_layout)?;
        self.gbuffer_set = self.descriptors.allocate(&self.gbuffer_layout)?;

        let storage = vk::DescriptorType::STORAGE_IMAGE;
        let general = vk::ImageLayout::GENERAL;
        DescriptorWriter::new()
            .write_image(0, self.draw_image.view(), vk::Sampler::null(), general, storage)
            .update_set(self.device.as_ref(), self.draw_image_set);

        let mut writer = DescriptorWriter::new();
        for (binding, image) in self.gbuffer.iter().enumerate() {
            writer.write_image(binding as u32, image.view(), vk::Sampler::null(), general, storage);
        }
        writer
            .write_image(GBUFFER_DRAW_IMAGE_BINDING, self.draw_image.view(), vk::Sampler::null(), general, storage)
            .update_set(self.device.as_ref(), self.gbuffer_set);
        Ok(())
    }

    /// Current size of every target
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Layout of the single storage-image set compute backgrounds write through
    pub fn draw_image_layout(&self) -> &DescriptorSetLayout {
        &self.draw_image_layout
    }

    /// Layout of the G-buffer plus draw image set read by lighting
    pub fn gbuffer_layout(&self) -> &DescriptorSetLayout {
        &self.gbuffer_layout
    }

    /// Set binding the draw image alone
    pub fn draw_image_set(&self) -> vk::DescriptorSet {
        self.draw_image_set
    }

    /// Set binding the G-buffer and the draw image
    pub fn gbuffer_set(&self) -> vk::DescriptorSet {
        self.gbuffer_set
    }

    /// HDR colour target
    pub fn draw_image(&self) -> &AllocatedImage {
        &self.draw_image
    }

    /// Scene depth
    pub fn depth_image(&self) -> &AllocatedImage {
        &self.depth_image
    }

    /// G-buffer images in binding order
    pub fn gbuffer(&self) -> &[AllocatedImage; 4] {
        &self.gbuffer
    }

    /// Attachments of the G-buffer pass
    pub fn gbuffer_targets(&self) -> GBufferTargets {
        GBufferTargets {
            color: [
                self.gbuffer[0].view(),
                self.gbuffer[1].view(),
                self.gbuffer[2].view(),
                self.gbuffer[3].view(),
            ],
            depth: self.depth_image.view(),
            extent: self.extent,
        }
    }

    /// Move the draw image to `layout`
    pub fn record_draw_image_transition(&mut self, recorder: &mut CommandRecorder<'_>, layout: vk::ImageLayout) {
        self.draw_image
            .record_transition_barriered(recorder, layout, vk::ImageAspectFlags::COLOR);
    }

    /// Move the depth image to `layout`
    pub fn record_depth_transition(&mut self, recorder: &mut CommandRecorder<'_>, layout: vk::ImageLayout) {
        self.depth_image
            .record_transition_barriered(recorder, layout, vk::ImageAspectFlags::DEPTH);
    }

    /// Move every G-buffer image to `layout`
    pub fn record_gbuffer_transition(&mut self, recorder: &mut CommandRecorder<'_>, layout: vk::ImageLayout) {
        for image in &mut self.gbuffer {
            image.record_transition_barriered(recorder, layout, vk::ImageAspectFlags::COLOR);
        }
    }
}

fn allocate_images(
    device: &Arc<dyn GpuDevice>,
    allocator: &Arc<dyn MemoryAllocator>,
    extent: vk::Extent2D,
) -> VulkanResult<(AllocatedImage, AllocatedImage, [AllocatedImage; 4])> {
    let draw_image = AllocatedImage::allocate(
        device,
        allocator,
        &ImageDesc::color(
            DRAW_IMAGE_FORMAT,
            extent,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
        ),
    )?;
    let depth_image = AllocatedImage::allocate(
        device,
        allocator,
        &ImageDesc::depth(DEPTH_FORMAT, extent, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
    )?;
    let gbuffer_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::STORAGE;
    let [diffuse, specular, normal, position] = GBUFFER_FORMATS
        .map(|format| AllocatedImage::allocate(device, allocator, &ImageDesc::color(format, extent, gbuffer_usage)));
    Ok((draw_image, depth_image, [diffuse?, specular?, normal?, position?]))
}
