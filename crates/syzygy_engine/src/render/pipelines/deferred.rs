//! G-buffer geometry pass
//!
//! Writes diffuse, specular, normal and world-position targets plus reversed depth. Lighting
//! happens later in compute.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use super::load_validated;
use crate::render::backends::vulkan::device::{AttachmentInfo, RenderingAttachments};
use crate::render::backends::vulkan::{
    CommandRecorder, GpuDevice, GpuMeshBuffers, GraphicsPipelineBuilder, Pipeline, PipelineLayout, ShaderLibrary,
    ShaderModule, VulkanResult,
};

/// Vertex shader of the G-buffer pass
pub const GBUFFER_VERTEX_SHADER: &str = "deferred_gbuffer.vert";
/// Fragment shader of the G-buffer pass
pub const GBUFFER_FRAGMENT_SHADER: &str = "deferred_gbuffer.frag";

/// Push constants of one G-buffer draw
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GBufferPushConstants {
    /// Vertex storage buffer
    pub vertex_buffer: vk::DeviceAddress,
    /// Instance transform array
    pub instance_buffer: vk::DeviceAddress,
    /// Camera array
    pub camera_buffer: vk::DeviceAddress,
    /// Camera to render through
    pub camera_index: u32,
    /// Keeps the block a multiple of 8 bytes
    pub padding: u32,
}

/// Attachments of one G-buffer pass, all in attachment layouts
#[derive(Debug, Clone, Copy)]
pub struct GBufferTargets {
    /// Diffuse, specular, normal and position views, in location order
    pub color: [vk::ImageView; 4],
    /// Depth view
    pub depth: vk::ImageView,
    /// Extent of every target
    pub extent: vk::Extent2D,
}

/// Geometry pipeline writing the G-buffer
pub struct DeferredPipeline {
    pipeline: Pipeline,
    layout: PipelineLayout,
}

impl DeferredPipeline {
    /// Build for colour targets of `color_formats` and a depth target of `depth_format`
    pub fn new(
        device: &Arc<dyn GpuDevice>,
        shaders: &dyn ShaderLibrary,
        color_formats: [vk::Format; 4],
        depth_format: vk::Format,
    ) -> VulkanResult<Self> {
        let vertex_binary = load_validated::<GBufferPushConstants>(shaders, GBUFFER_VERTEX_SHADER)?;
        let fragment_binary = shaders.load(GBUFFER_FRAGMENT_SHADER)?;
        let vertex = ShaderModule::new(device, &vertex_binary)?;
        let fragment = ShaderModule::new(device, &fragment_binary)?;

        let layout = PipelineLayout::new(
            device,
            &[],
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            std::mem::size_of::<GBufferPushConstants>() as u32,
        )?;
        let pipeline = GraphicsPipelineBuilder::new(&layout, &vertex)
            .fragment(&fragment)
            .cull(vk::CullModeFlags::BACK, vk::FrontFace::COUNTER_CLOCKWISE)
            .color_formats(&color_formats)
            .depth(depth_format, vk::CompareOp::GREATER_OR_EQUAL, true)
            .build(device)?;

        Ok(Self { pipeline, layout })
    }

    /// Clear the G-buffer and draw every instance of `mesh` into it
    ///
    /// With no mesh the pass only clears.
    pub fn record_draw_commands(
        &self,
        recorder: &mut CommandRecorder<'_>,
        targets: &GBufferTargets,
        mesh: Option<&GpuMeshBuffers>,
        instance_count: u32,
        push: &GBufferPushConstants,
    ) {
        let color = targets
            .color
            .iter()
            .map(|&view| AttachmentInfo::clear_color(view, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, [0.0; 4]))
            .collect();
        recorder.begin_rendering(&RenderingAttachments {
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: targets.extent,
            },
            color,
            depth: Some(AttachmentInfo::clear_depth(
                targets.depth,
                vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
                0.0,
            )),
        });

        if let Some(mesh) = mesh.filter(|_| instance_count > 0) {
            recorder.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle());
            recorder.set_viewport_and_scissor(targets.extent);
            recorder.push_constants(
                self.layout.handle(),
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                push,
            );
            recorder.bind_index_buffer(mesh.index_buffer());
            for surface in mesh.surfaces() {
                recorder.draw_indexed(surface.index_count, instance_count, surface.first_index);
            }
        }

        recorder.end_rendering();
    }
}
