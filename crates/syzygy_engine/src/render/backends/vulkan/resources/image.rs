//! GPU images with tracked layouts
//!
//! The API has no query for an image's current layout, so [`AllocatedImage`] remembers the
//! layout it last transitioned to. [`AllocatedImage::record_transition_barriered`] is the only
//! way to change it. [`ImageStorage`] is the untracked half, used where several images share
//! one tracked layout (the shadow map array).

use ash::vk;
use std::sync::Arc;

use super::allocator::{AllocationId, MemoryAllocator, MemoryPolicy};
use crate::render::backends::vulkan::device::{GpuDevice, ImageViewDesc};
use crate::render::backends::vulkan::error::VulkanResult;
use crate::render::backends::vulkan::rendering::commands::{subresource_range, CommandRecorder};

/// Creation parameters of a 2D image
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Texel format
    pub format: vk::Format,
    /// Size in texels
    pub extent: vk::Extent2D,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Tiling
    pub tiling: vk::ImageTiling,
    /// Aspect exposed by the view
    pub aspect: vk::ImageAspectFlags,
    /// Memory placement
    pub memory: MemoryPolicy,
}

impl ImageDesc {
    /// Optimally tiled, device-local colour image
    pub fn color(format: vk::Format, extent: vk::Extent2D, usage: vk::ImageUsageFlags) -> Self {
        Self {
            format,
            extent,
            usage,
            tiling: vk::ImageTiling::OPTIMAL,
            aspect: vk::ImageAspectFlags::COLOR,
            memory: MemoryPolicy::DEVICE_LOCAL,
        }
    }

    /// Optimally tiled, device-local depth image
    pub fn depth(format: vk::Format, extent: vk::Extent2D, usage: vk::ImageUsageFlags) -> Self {
        Self {
            aspect: vk::ImageAspectFlags::DEPTH,
            ..Self::color(format, extent, usage)
        }
    }
}

/// Image, memory and view without layout tracking
pub struct ImageStorage {
    device: Arc<dyn GpuDevice>,
    allocator: Arc<dyn MemoryAllocator>,
    image: vk::Image,
    allocation: Option<AllocationId>,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
    aspect: vk::ImageAspectFlags,
}

impl ImageStorage {
    /// Allocate a 2D image and a view over it
    pub fn allocate(
        device: &Arc<dyn GpuDevice>,
        allocator: &Arc<dyn MemoryAllocator>,
        desc: &ImageDesc,
    ) -> VulkanResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .build();
        let allocated = allocator.create_image(&image_info, desc.memory)?;

        let view = match device.create_image_view(&ImageViewDesc {
            image: allocated.image,
            format: desc.format,
            aspect: desc.aspect,
            view_type: vk::ImageViewType::TYPE_2D,
        }) {
            Ok(view) => view,
            Err(err) => {
                allocator.destroy_image(allocated.image, allocated.allocation);
                return Err(err);
            }
        };

        log::trace!(
            "Allocated {:?} image {}x{} ({:?})",
            desc.format,
            desc.extent.width,
            desc.extent.height,
            desc.usage
        );
        Ok(Self {
            device: Arc::clone(device),
            allocator: Arc::clone(allocator),
            image: allocated.image,
            allocation: Some(allocated.allocation),
            view,
            format: desc.format,
            extent: desc.extent,
            aspect: desc.aspect,
        })
    }

    /// Image handle
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// View handle
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Size in texels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Aspect covered by the view
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }
}

impl Drop for ImageStorage {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.device.destroy_image_view(self.view);
            self.allocator.destroy_image(self.image, allocation);
        }
    }
}

/// Image with its last known layout
pub struct AllocatedImage {
    storage: ImageStorage,
    expected_layout: vk::ImageLayout,
}

impl AllocatedImage {
    /// Allocate an image; it starts in `UNDEFINED`
    pub fn allocate(
        device: &Arc<dyn GpuDevice>,
        allocator: &Arc<dyn MemoryAllocator>,
        desc: &ImageDesc,
    ) -> VulkanResult<Self> {
        Ok(Self {
            storage: ImageStorage::allocate(device, allocator, desc)?,
            expected_layout: vk::ImageLayout::UNDEFINED,
        })
    }

    /// Layout the last recorded transition left the image in
    pub fn expected_layout(&self) -> vk::ImageLayout {
        self.expected_layout
    }

    /// Image handle
    pub fn image(&self) -> vk::Image {
        self.storage.image()
    }

    /// View handle
    pub fn view(&self) -> vk::ImageView {
        self.storage.view()
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.storage.format()
    }

    /// Size in texels
    pub fn extent(&self) -> vk::Extent2D {
        self.storage.extent()
    }

    /// Record a full barrier into `dst_layout` and remember it
    pub fn record_transition_barriered(
        &mut self,
        recorder: &mut CommandRecorder<'_>,
        dst_layout: vk::ImageLayout,
        aspect: vk::ImageAspectFlags,
    ) {
        record_layout_transition(recorder, &[self.storage.image()], self.expected_layout, dst_layout, aspect);
        self.expected_layout = dst_layout;
    }

    /// Blit the whole image over the whole of `dst`
    ///
    /// Both images must already be in transfer layouts.
    pub fn record_copy_entire(&self, recorder: &mut CommandRecorder<'_>, dst: &Self) {
        record_blit(
            recorder,
            (self.image(), self.extent()),
            (dst.image(), dst.extent()),
        );
    }

    /// Blit `src_rect` of this image into `dst_rect` of `dst`
    ///
    /// Both images must already be in transfer layouts.
    pub fn record_copy_rect(&self, recorder: &mut CommandRecorder<'_>, dst: &Self, src_rect: vk::Rect2D, dst_rect: vk::Rect2D) {
        recorder.blit_image(
            self.image(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst.image(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            blit_region(src_rect, dst_rect),
        );
    }
}

/// Full pipeline barrier moving every image in `images` from `old` to `new` as one batch
pub(crate) fn record_layout_transition(
    recorder: &mut CommandRecorder<'_>,
    images: &[vk::Image],
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    aspect: vk::ImageAspectFlags,
) {
    let barriers: Vec<_> = images
        .iter()
        .map(|&image| {
            vk::ImageMemoryBarrier2::builder()
                .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
                .old_layout(old)
                .new_layout(new)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(subresource_range(aspect))
                .build()
        })
        .collect();
    recorder.pipeline_barrier(&[], &[], &barriers);
}

/// Blit the whole of `src` over the whole of `dst` (transfer layouts assumed)
pub fn record_blit(
    recorder: &mut CommandRecorder<'_>,
    (src, src_extent): (vk::Image, vk::Extent2D),
    (dst, dst_extent): (vk::Image, vk::Extent2D),
) {
    let full = |extent: vk::Extent2D| vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    recorder.blit_image(
        src,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        dst,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        blit_region(full(src_extent), full(dst_extent)),
    );
}

fn blit_region(src: vk::Rect2D, dst: vk::Rect2D) -> vk::ImageBlit {
    let corners = |rect: vk::Rect2D| {
        [
            vk::Offset3D { x: rect.offset.x, y: rect.offset.y, z: 0 },
            vk::Offset3D {
                x: rect.offset.x + rect.extent.width as i32,
                y: rect.offset.y + rect.extent.height as i32,
                z: 1,
            },
        ]
    };
    let layers = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    vk::ImageBlit {
        src_subresource: layers,
        src_offsets: corners(src),
        dst_subresource: layers,
        dst_offsets: corners(dst),
    }
}

/// Sampler with automatic cleanup
pub struct Sampler {
    device: Arc<dyn GpuDevice>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Create a sampler
    pub fn new(device: &Arc<dyn GpuDevice>, info: &vk::SamplerCreateInfo) -> VulkanResult<Self> {
        Ok(Self {
            device: Arc::clone(device),
            sampler: device.create_sampler(info)?,
        })
    }

    /// Sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.device.destroy_sampler(self.sampler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::testing::{Command, MockGpu};

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 64, height: 32 };

    fn color_image(gpu: &MockGpu) -> AllocatedImage {
        AllocatedImage::allocate(
            &gpu.device,
            &gpu.allocator,
            &ImageDesc::color(vk::Format::R16G16B16A16_SFLOAT, EXTENT, vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC),
        )
        .unwrap()
    }

    #[test]
    fn test_transition_tracks_layout() {
        let gpu = MockGpu::new();
        let mut image = color_image(&gpu);
        let cmd = gpu.begin_commands();
        let mut recorder = CommandRecorder::new(gpu.device.as_ref(), cmd);

        assert_eq!(image.expected_layout(), vk::ImageLayout::UNDEFINED);
        image.record_transition_barriered(&mut recorder, vk::ImageLayout::GENERAL, vk::ImageAspectFlags::COLOR);
        image.record_transition_barriered(&mut recorder, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageAspectFlags::COLOR);

        assert_eq!(image.expected_layout(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        let commands = gpu.mock.recorded(cmd);
        assert_eq!(
            commands,
            vec![
                Command::Barrier {
                    images: vec![(image.image(), vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL)],
                    buffers: vec![],
                },
                Command::Barrier {
                    images: vec![(image.image(), vk::ImageLayout::GENERAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)],
                    buffers: vec![],
                },
            ]
        );
    }

    #[test]
    fn test_batched_transition_is_one_barrier() {
        let gpu = MockGpu::new();
        let cmd = gpu.begin_commands();
        let mut recorder = CommandRecorder::new(gpu.device.as_ref(), cmd);
        let images = [color_image(&gpu), color_image(&gpu), color_image(&gpu)];
        let handles: Vec<_> = images.iter().map(AllocatedImage::image).collect();

        record_layout_transition(&mut recorder, &handles, vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL, vk::ImageAspectFlags::COLOR);

        let commands = gpu.mock.recorded(cmd);
        assert_eq!(commands.len(), 1);
        assert!(matches!(&commands[0], Command::Barrier { images, .. } if images.len() == 3));
    }

    #[test]
    fn test_copy_entire_blits() {
        let gpu = MockGpu::new();
        let src = color_image(&gpu);
        let dst = color_image(&gpu);
        let cmd = gpu.begin_commands();
        let mut recorder = CommandRecorder::new(gpu.device.as_ref(), cmd);

        src.record_copy_entire(&mut recorder, &dst);

        assert_eq!(gpu.mock.recorded(cmd), vec![Command::Blit { src: src.image(), dst: dst.image() }]);
    }

    #[test]
    fn test_blit_region_corners() {
        let region = blit_region(
            vk::Rect2D { offset: vk::Offset2D { x: 2, y: 3 }, extent: vk::Extent2D { width: 10, height: 20 } },
            vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: EXTENT },
        );
        assert_eq!(region.src_offsets[1], vk::Offset3D { x: 12, y: 23, z: 1 });
        assert_eq!(region.dst_offsets[1], vk::Offset3D { x: 64, y: 32, z: 1 });
    }

    #[test]
    fn test_drop_releases_view_and_memory() {
        let gpu = MockGpu::new();
        drop(color_image(&gpu));
        assert_eq!(gpu.mock.live("image_view"), 0);
        assert_eq!(gpu.memory.live_images(), 0);
    }
}
