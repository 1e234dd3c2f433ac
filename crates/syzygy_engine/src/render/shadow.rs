//! Shadow map array
//!
//! A fixed pool of depth textures, one per shadow-casting light. Each frame the light set is
//! re-staged from scratch: directional lights first, then spot lights, each in input order.
//! Shadow map `i` belongs to the `i`-th pushed light, and the lighting pass relies on the
//! same order. Lights beyond the capacity are dropped with a warning.
//!
//! All textures share one tracked layout and are transitioned as one batch. Projection
//! buffers and descriptor sets are kept per frame slot; a slot's sets are rewritten only when
//! the active light count it was written for changes.

use ash::vk;
use std::sync::Arc;

use super::pipelines::{OffscreenShadowPipeline, ShadowPushConstants};
use super::scene::{light_projections, DirectionalLight, SpotLight};
use crate::foundation::math::{to_gpu, GpuMat4};
use crate::render::backends::vulkan::device::{AttachmentInfo, LayoutBinding, RenderingAttachments};
use crate::render::backends::vulkan::resources::image::record_layout_transition;
use crate::render::backends::vulkan::{
    CommandRecorder, DescriptorAllocator, DescriptorLayoutBuilder, DescriptorSetLayout, DescriptorWriter, GpuDevice,
    GpuMeshBuffers, ImageDesc, ImageStorage, MemoryAllocator, PoolSizeRatio, Sampler, ShaderLibrary,
    TypedStagedBuffer, VulkanResult,
};

/// Depth format of every shadow map
pub const SHADOW_MAP_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Creation parameters of a [`ShadowPassArray`]
#[derive(Debug, Clone, Copy)]
pub struct ShadowPassDesc {
    /// Number of shadow maps
    pub capacity: u32,
    /// Edge length of each map in texels
    pub resolution: u32,
    /// Most lights a frame may submit, including the ones that get dropped
    pub max_lights: u32,
    /// Frame slots to keep projection buffers and descriptor sets for
    pub frames_in_flight: usize,
}

struct ShadowFrame {
    projections: TypedStagedBuffer<GpuMat4>,
    descriptors: DescriptorAllocator,
    sampler_set: vk::DescriptorSet,
    texture_set: vk::DescriptorSet,
    written_count: Option<u32>,
}

/// Pool of shadow maps with their sampler and descriptor layouts
pub struct ShadowPassArray {
    device: Arc<dyn GpuDevice>,
    pipeline: OffscreenShadowPipeline,
    frames: Vec<ShadowFrame>,
    sampler_layout: DescriptorSetLayout,
    texture_layout: DescriptorSetLayout,
    textures: Vec<ImageStorage>,
    sampler: Sampler,
    extent: vk::Extent2D,
    current_frame: usize,
    active_count: u32,
    active_layout: vk::ImageLayout,
    depth_bias: (f32, f32),
}

impl ShadowPassArray {
    /// Allocate every shadow map and per-frame resource up front
    pub fn new(
        device: &Arc<dyn GpuDevice>,
        allocator: &Arc<dyn MemoryAllocator>,
        shaders: &dyn ShaderLibrary,
        desc: &ShadowPassDesc,
    ) -> VulkanResult<Self> {
        let capacity = desc.capacity.max(1);
        let extent = vk::Extent2D {
            width: desc.resolution,
            height: desc.resolution,
        };

        let sampler = Sampler::new(
            device,
            &vk::SamplerCreateInfo::builder()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_BORDER)
                .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_BORDER)
                .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_BORDER)
                // Depth 0 is the far plane, so samples outside the map are lit
                .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
                .compare_enable(true)
                .compare_op(vk::CompareOp::GREATER_OR_EQUAL)
                .build(),
        )?;

        let stages = vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::FRAGMENT;
        let sampler_layout = DescriptorLayoutBuilder::new()
            .add_binding_with(LayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::SAMPLER,
                count: 1,
                stage_flags: stages,
                immutable_samplers: vec![sampler.handle()],
                ..Default::default()
            })
            .build(device, vk::DescriptorSetLayoutCreateFlags::empty())?;
        let texture_layout = DescriptorLayoutBuilder::new()
            .add_binding_with(LayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::SAMPLED_IMAGE,
                count: capacity,
                stage_flags: stages,
                binding_flags: vk::DescriptorBindingFlags::PARTIALLY_BOUND
                    | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT,
                ..Default::default()
            })
            .build(device, vk::DescriptorSetLayoutCreateFlags::empty())?;

        let usage = vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
            | vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_DST;
        let textures = (0..capacity)
            .map(|_| ImageStorage::allocate(device, allocator, &ImageDesc::depth(SHADOW_MAP_FORMAT, extent, usage)))
            .collect::<VulkanResult<Vec<_>>>()?;

        // Room for every submitted light so the overflow can be popped afterwards
        let projection_capacity = desc.max_lights.max(capacity) as usize;
        let ratios = [
            PoolSizeRatio::new(vk::DescriptorType::SAMPLER, 0.5),
            PoolSizeRatio::new(vk::DescriptorType::SAMPLED_IMAGE, capacity as f32 / 2.0),
        ];
        let frames = (0..desc.frames_in_flight.max(1))
            .map(|_| {
                Ok(ShadowFrame {
                    projections: TypedStagedBuffer::allocate(
                        device.as_ref(),
                        allocator,
                        projection_capacity,
                        vk::BufferUsageFlags::STORAGE_BUFFER,
                    )?,
                    descriptors: DescriptorAllocator::create(
                        device,
                        2,
                        &ratios,
                        vk::DescriptorPoolCreateFlags::empty(),
                    )?,
                    sampler_set: vk::DescriptorSet::null(),
                    texture_set: vk::DescriptorSet::null(),
                    written_count: None,
                })
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let pipeline = OffscreenShadowPipeline::new(device, shaders, SHADOW_MAP_FORMAT)?;

        log::info!(
            "Shadow pass array: {capacity} maps of {}x{}",
            extent.width,
            extent.height
        );
        Ok(Self {
            device: Arc::clone(device),
            pipeline,
            frames,
            sampler_layout,
            texture_layout,
            textures,
            sampler,
            extent,
            current_frame: 0,
            active_count: 0,
            active_layout: vk::ImageLayout::UNDEFINED,
            depth_bias: (0.0, 0.0),
        })
    }

    /// Number of shadow maps
    pub fn capacity(&self) -> u32 {
        self.textures.len() as u32
    }

    /// Maps in use this frame
    pub fn active_count(&self) -> u32 {
        self.active_count
    }

    /// Layout the active maps were last transitioned to
    pub fn active_layout(&self) -> vk::ImageLayout {
        self.active_layout
    }

    /// Size of each map
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Layout of the comparison sampler set
    pub fn sampler_layout(&self) -> &DescriptorSetLayout {
        &self.sampler_layout
    }

    /// Layout of the shadow texture array set
    pub fn texture_layout(&self) -> &DescriptorSetLayout {
        &self.texture_layout
    }

    /// Comparison sampler shared by every map
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.handle()
    }

    /// Sampler and texture array sets of the current frame
    pub fn descriptor_sets(&self) -> (vk::DescriptorSet, vk::DescriptorSet) {
        let frame = &self.frames[self.current_frame];
        (frame.sampler_set, frame.texture_set)
    }

    /// Device address of the current frame's projection array
    pub fn projection_address(&self) -> vk::DeviceAddress {
        self.frames[self.current_frame].projections.device_address()
    }

    /// Projection*view matrices staged for the current frame
    pub fn staged_projections(&self) -> &[GpuMat4] {
        self.frames[self.current_frame].projections.read_staged()
    }

    /// Stage the light set and prepare the active maps for drawing
    ///
    /// Calling this again in the same frame replaces the previous light set entirely.
    pub fn record_initialize(
        &mut self,
        recorder: &mut CommandRecorder<'_>,
        frame_slot: usize,
        depth_bias: f32,
        depth_bias_slope: f32,
        directional_lights: &[DirectionalLight],
        spot_lights: &[SpotLight],
    ) -> VulkanResult<()> {
        self.current_frame = frame_slot % self.frames.len();
        self.depth_bias = (depth_bias, depth_bias_slope);
        let capacity = self.textures.len();
        let frame = &mut self.frames[self.current_frame];

        frame.projections.clear_staged();
        let requested = directional_lights.len() + spot_lights.len();
        for projection in light_projections(directional_lights, spot_lights) {
            if !frame.projections.push_staged(&[to_gpu(&projection)]) {
                break;
            }
        }
        let pushed = frame.projections.len();
        if pushed > capacity {
            frame.projections.pop_staged(pushed - capacity);
        }
        let active = frame.projections.len();
        if active < requested {
            log::warn!(
                "{requested} shadow casting lights but only {capacity} shadow maps, dropping {}",
                requested - active
            );
        }
        self.active_count = active as u32;

        frame.projections.record_copy_to_device(recorder)?;
        frame.projections.record_total_copy_barrier(
            recorder,
            vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_READ,
        );

        // Every map is cleared or unused this frame, so previous contents are discarded
        let all: Vec<_> = self.textures.iter().map(ImageStorage::image).collect();
        record_layout_transition(
            recorder,
            &all,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageAspectFlags::DEPTH,
        );
        self.active_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        for texture in &self.textures[..active] {
            recorder.clear_depth_image(texture.image(), vk::ImageLayout::TRANSFER_DST_OPTIMAL, 0.0);
        }
        self.record_transition_active_shadow_maps(recorder, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);

        self.provision_descriptors()
    }

    /// Draw every instance of `mesh` into each active map with that map's projection
    ///
    /// Returns the number of maps drawn.
    pub fn record_draw_commands(
        &self,
        recorder: &mut CommandRecorder<'_>,
        mesh: &GpuMeshBuffers,
        instance_buffer: vk::DeviceAddress,
        instance_count: u32,
    ) -> u32 {
        if instance_count == 0 || self.active_count == 0 {
            return 0;
        }
        debug_assert_eq!(self.active_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);

        let projection_buffer = self.projection_address();
        for (index, texture) in self.textures[..self.active_count as usize].iter().enumerate() {
            recorder.begin_rendering(&RenderingAttachments {
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: self.extent,
                },
                color: Vec::new(),
                depth: Some(AttachmentInfo::load(
                    texture.view(),
                    vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
                )),
            });
            let push = ShadowPushConstants {
                vertex_buffer: mesh.vertex_address(),
                instance_buffer,
                projection_buffer,
                projection_index: index as u32,
                padding: 0,
            };
            self.pipeline
                .record_draw_commands(recorder, self.extent, self.depth_bias, mesh, instance_count, &push);
            recorder.end_rendering();
        }
        self.active_count
    }

    /// Move every active map from the tracked layout to `dst_layout` as one batch
    pub fn record_transition_active_shadow_maps(
        &mut self,
        recorder: &mut CommandRecorder<'_>,
        dst_layout: vk::ImageLayout,
    ) {
        let active: Vec<_> = self.textures[..self.active_count as usize]
            .iter()
            .map(ImageStorage::image)
            .collect();
        record_layout_transition(recorder, &active, self.active_layout, dst_layout, vk::ImageAspectFlags::DEPTH);
        self.active_layout = dst_layout;
    }

    // Rewrites the current frame's sets when its active count changed
    fn provision_descriptors(&mut self) -> VulkanResult<()> {
        let active = self.active_count;
        let frame = &mut self.frames[self.current_frame];
        if frame.written_count == Some(active) {
            return Ok(());
        }

        frame.descriptors.clear_descriptors()?;
        frame.sampler_set = frame.descriptors.allocate(&self.sampler_layout)?;
        // A zero-length variable binding is legal but some drivers reject it
        frame.texture_set = frame
            .descriptors
            .allocate_variable(&self.texture_layout, active.max(1))?;

        let images = self.textures[..active as usize]
            .iter()
            .map(|texture| vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: texture.view(),
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            })
            .collect();
        DescriptorWriter::new()
            .write_images(0, 0, vk::DescriptorType::SAMPLED_IMAGE, images)
            .update_set(self.device.as_ref(), frame.texture_set);

        log::debug!(
            "Shadow descriptors of frame slot {} rewritten for {active} maps",
            self.current_frame
        );
        frame.written_count = Some(active);
        Ok(())
    }
}
