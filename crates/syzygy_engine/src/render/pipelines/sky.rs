//! Sky compute pass
//!
//! Fills the draw image with the atmosphere seen through the active camera. Lighting later
//! overwrites the pixels covered by geometry.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use super::load_validated;
use crate::render::backends::vulkan::{
    CommandRecorder, DescriptorSetLayout, GpuDevice, Pipeline, PipelineLayout, ShaderLibrary, ShaderModule,
    VulkanResult,
};

/// Compute shader of the sky pass
pub const SKY_SHADER: &str = "sky.comp";

/// Push constants of the sky dispatch
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SkyPushConstants {
    /// Atmosphere array
    pub atmosphere_buffer: vk::DeviceAddress,
    /// Camera array
    pub camera_buffer: vk::DeviceAddress,
    /// Atmosphere to render
    pub atmosphere_index: u32,
    /// Camera to render through
    pub camera_index: u32,
}

/// Compute pipeline writing the sky into the draw image
pub struct SkyPipeline {
    pipeline: Pipeline,
    layout: PipelineLayout,
}

impl SkyPipeline {
    /// Build against the draw image layout (set 0)
    pub fn new(
        device: &Arc<dyn GpuDevice>,
        shaders: &dyn ShaderLibrary,
        draw_image_layout: &DescriptorSetLayout,
    ) -> VulkanResult<Self> {
        let binary = load_validated::<SkyPushConstants>(shaders, SKY_SHADER)?;
        let module = ShaderModule::new(device, &binary)?;
        let layout = PipelineLayout::new(
            device,
            &[draw_image_layout.handle()],
            vk::ShaderStageFlags::COMPUTE,
            std::mem::size_of::<SkyPushConstants>() as u32,
        )?;
        let pipeline = Pipeline::compute(device, &layout, &module)?;
        Ok(Self { pipeline, layout })
    }

    /// Dispatch over `extent` with the draw image in `GENERAL`
    pub fn record_draw_commands(
        &self,
        recorder: &mut CommandRecorder<'_>,
        draw_image_set: vk::DescriptorSet,
        extent: vk::Extent2D,
        push: &SkyPushConstants,
    ) {
        recorder.bind_pipeline(vk::PipelineBindPoint::COMPUTE, self.pipeline.handle());
        recorder.bind_descriptor_sets(vk::PipelineBindPoint::COMPUTE, self.layout.handle(), 0, &[draw_image_set]);
        recorder.push_constants(self.layout.handle(), vk::ShaderStageFlags::COMPUTE, push);
        recorder.dispatch_2d(extent);
    }
}
