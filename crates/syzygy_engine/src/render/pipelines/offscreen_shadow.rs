//! Depth-only pipeline rendering one shadow map per light

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use super::load_validated;
use crate::render::backends::vulkan::{
    CommandRecorder, GpuDevice, GpuMeshBuffers, GraphicsPipelineBuilder, Pipeline, PipelineLayout, ShaderLibrary,
    ShaderModule, VulkanResult,
};

/// Vertex shader of the shadow pass
pub const SHADOW_VERTEX_SHADER: &str = "shadow_depth.vert";

/// Push constants of one shadow draw
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ShadowPushConstants {
    /// Vertex storage buffer
    pub vertex_buffer: vk::DeviceAddress,
    /// Instance transform array
    pub instance_buffer: vk::DeviceAddress,
    /// Light projection*view array
    pub projection_buffer: vk::DeviceAddress,
    /// Entry of the projection array used by this draw
    pub projection_index: u32,
    /// Keeps the block a multiple of 8 bytes
    pub padding: u32,
}

/// Depth-only graphics pipeline with dynamic depth bias
pub struct OffscreenShadowPipeline {
    pipeline: Pipeline,
    layout: PipelineLayout,
}

impl OffscreenShadowPipeline {
    /// Build for depth attachments of `depth_format`
    pub fn new(device: &Arc<dyn GpuDevice>, shaders: &dyn ShaderLibrary, depth_format: vk::Format) -> VulkanResult<Self> {
        let binary = load_validated::<ShadowPushConstants>(shaders, SHADOW_VERTEX_SHADER)?;
        let vertex = ShaderModule::new(device, &binary)?;
        let layout = PipelineLayout::new(
            device,
            &[],
            vk::ShaderStageFlags::VERTEX,
            std::mem::size_of::<ShadowPushConstants>() as u32,
        )?;

        // Reversed depth: closer fragments have larger depth values
        let pipeline = GraphicsPipelineBuilder::new(&layout, &vertex)
            .cull(vk::CullModeFlags::NONE, vk::FrontFace::COUNTER_CLOCKWISE)
            .depth(depth_format, vk::CompareOp::GREATER_OR_EQUAL, true)
            .dynamic_depth_bias()
            .build(device)?;

        Ok(Self { pipeline, layout })
    }

    /// Draw every instance of `mesh` into the shadow map currently being rendered
    ///
    /// The caller has begun rendering into the target depth attachment.
    pub fn record_draw_commands(
        &self,
        recorder: &mut CommandRecorder<'_>,
        extent: vk::Extent2D,
        depth_bias: (f32, f32),
        mesh: &GpuMeshBuffers,
        instance_count: u32,
        push: &ShadowPushConstants,
    ) {
        recorder.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle());
        recorder.set_viewport_and_scissor(extent);
        recorder.set_depth_bias(depth_bias.0, depth_bias.1);
        recorder.push_constants(self.layout.handle(), vk::ShaderStageFlags::VERTEX, push);
        recorder.bind_index_buffer(mesh.index_buffer());
        for surface in mesh.surfaces() {
            recorder.draw_indexed(surface.index_count, instance_count, surface.first_index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::testing::{MockGpu, MockShaderLibrary};

    #[test]
    fn test_block_is_padded_to_eight_bytes() {
        assert_eq!(std::mem::size_of::<ShadowPushConstants>(), 32);
    }

    #[test]
    fn test_creation_releases_shader_module() {
        let gpu = MockGpu::new();
        let library = MockShaderLibrary::new().with_push_size(SHADOW_VERTEX_SHADER, 32);

        let pipeline = OffscreenShadowPipeline::new(&gpu.device, &library, vk::Format::D32_SFLOAT).unwrap();
        assert_eq!(gpu.mock.live("shader_module"), 0);
        assert_eq!(gpu.mock.live("pipeline"), 1);
        drop(pipeline);
        assert!(gpu.mock.leaked_kinds().is_empty());
    }
}
