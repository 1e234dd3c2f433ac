//! Deferred lighting in compute
//!
//! Reads the G-buffer as storage images, samples the shadow maps through the shadow pass
//! descriptor sets and writes lit colour into the draw image wherever geometry was drawn.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use super::load_validated;
use crate::render::backends::vulkan::{
    CommandRecorder, DescriptorSetLayout, GpuDevice, Pipeline, PipelineLayout, ShaderLibrary, ShaderModule,
    VulkanResult,
};

/// Compute shader of the lighting pass
pub const LIGHTING_SHADER: &str = "deferred_lighting.comp";

/// Push constants of the lighting dispatch
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct LightingPushConstants {
    /// Camera array
    pub camera_buffer: vk::DeviceAddress,
    /// Atmosphere array
    pub atmosphere_buffer: vk::DeviceAddress,
    /// Directional light array
    pub directional_light_buffer: vk::DeviceAddress,
    /// Spot light array
    pub spot_light_buffer: vk::DeviceAddress,
    /// Shadow projection*view array
    pub shadow_projection_buffer: vk::DeviceAddress,
    /// Camera the G-buffer was rendered through
    pub camera_index: u32,
    /// Atmosphere lighting the scene
    pub atmosphere_index: u32,
    /// Valid entries of the directional light array
    pub directional_light_count: u32,
    /// Valid entries of the spot light array
    pub spot_light_count: u32,
    /// Lights with a shadow map; light `i` uses map `i` when `i < shadow_count`
    pub shadow_count: u32,
    /// Keeps the block a multiple of 8 bytes
    pub padding: u32,
}

/// Descriptor sets bound for one lighting dispatch, in set order
#[derive(Debug, Clone, Copy)]
pub struct LightingDescriptorSets {
    /// G-buffer and draw image storage images
    pub gbuffer: vk::DescriptorSet,
    /// Shadow comparison sampler
    pub shadow_sampler: vk::DescriptorSet,
    /// Shadow map texture array
    pub shadow_textures: vk::DescriptorSet,
}

/// Compute pipeline shading the G-buffer
pub struct LightingPipeline {
    pipeline: Pipeline,
    layout: PipelineLayout,
}

impl LightingPipeline {
    /// Build against the G-buffer layout (set 0) and the shadow layouts (sets 1 and 2)
    pub fn new(
        device: &Arc<dyn GpuDevice>,
        shaders: &dyn ShaderLibrary,
        gbuffer_layout: &DescriptorSetLayout,
        shadow_sampler_layout: &DescriptorSetLayout,
        shadow_texture_layout: &DescriptorSetLayout,
    ) -> VulkanResult<Self> {
        let binary = load_validated::<LightingPushConstants>(shaders, LIGHTING_SHADER)?;
        let module = ShaderModule::new(device, &binary)?;
        let layout = PipelineLayout::new(
            device,
            &[
                gbuffer_layout.handle(),
                shadow_sampler_layout.handle(),
                shadow_texture_layout.handle(),
            ],
            vk::ShaderStageFlags::COMPUTE,
            std::mem::size_of::<LightingPushConstants>() as u32,
        )?;
        let pipeline = Pipeline::compute(device, &layout, &module)?;
        Ok(Self { pipeline, layout })
    }

    /// Dispatch over `extent` with the G-buffer in `GENERAL` and shadow maps shader-readable
    pub fn record_draw_commands(
        &self,
        recorder: &mut CommandRecorder<'_>,
        sets: &LightingDescriptorSets,
        extent: vk::Extent2D,
        push: &LightingPushConstants,
    ) {
        recorder.bind_pipeline(vk::PipelineBindPoint::COMPUTE, self.pipeline.handle());
        recorder.bind_descriptor_sets(
            vk::PipelineBindPoint::COMPUTE,
            self.layout.handle(),
            0,
            &[sets.gbuffer, sets.shadow_sampler, sets.shadow_textures],
        );
        recorder.push_constants(self.layout.handle(), vk::ShaderStageFlags::COMPUTE, push);
        recorder.dispatch_2d(extent);
    }
}
