//! Pipeline construction and ownership
//!
//! [`GraphicsPipelineBuilder`] fills in a [`GraphicsPipelineDesc`] for dynamic rendering with
//! the defaults every pass here shares (dynamic viewport/scissor, no multisampling, entry point
//! `main`). [`PipelineLayout`] and [`Pipeline`] own the resulting handles.

use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use super::shader::ShaderModule;
use crate::render::backends::vulkan::device::{BlendMode, GpuDevice, GraphicsPipelineDesc};
use crate::render::backends::vulkan::error::VulkanResult;

/// Entry point of every shader stage
pub const ENTRY_POINT: &CStr = c"main";

/// Pipeline layout with automatic cleanup
pub struct PipelineLayout {
    device: Arc<dyn GpuDevice>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Create a layout with one push-constant range of `push_constant_size` bytes (none if 0)
    pub fn new(
        device: &Arc<dyn GpuDevice>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_stages: vk::ShaderStageFlags,
        push_constant_size: u32,
    ) -> VulkanResult<Self> {
        let ranges: Vec<_> = (push_constant_size > 0)
            .then_some(vk::PushConstantRange {
                stage_flags: push_constant_stages,
                offset: 0,
                size: push_constant_size,
            })
            .into_iter()
            .collect();
        let layout = device.create_pipeline_layout(set_layouts, &ranges)?;
        Ok(Self {
            device: Arc::clone(device),
            layout,
        })
    }

    /// Layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        self.device.destroy_pipeline_layout(self.layout);
    }
}

/// Pipeline with automatic cleanup
pub struct Pipeline {
    device: Arc<dyn GpuDevice>,
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    /// Create a compute pipeline
    pub fn compute(device: &Arc<dyn GpuDevice>, layout: &PipelineLayout, module: &ShaderModule) -> VulkanResult<Self> {
        let pipeline = device.create_compute_pipeline(layout.handle(), module.handle(), ENTRY_POINT)?;
        Ok(Self {
            device: Arc::clone(device),
            pipeline,
            bind_point: vk::PipelineBindPoint::COMPUTE,
        })
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Graphics or compute
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.device.destroy_pipeline(self.pipeline);
    }
}

/// Builder for dynamic-rendering graphics pipelines
pub struct GraphicsPipelineBuilder<'a> {
    desc: GraphicsPipelineDesc<'a>,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    /// Triangle-list pipeline with no attachments, depth test or culling
    pub fn new(layout: &PipelineLayout, vertex: &'a ShaderModule) -> Self {
        Self {
            desc: GraphicsPipelineDesc {
                layout: layout.handle(),
                vertex: (vertex.handle(), ENTRY_POINT),
                fragment: None,
                topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                polygon_mode: vk::PolygonMode::FILL,
                cull_mode: vk::CullModeFlags::NONE,
                front_face: vk::FrontFace::COUNTER_CLOCKWISE,
                color_formats: Vec::new(),
                depth_format: vk::Format::UNDEFINED,
                depth_compare: None,
                depth_write: false,
                depth_bias: false,
                blend: BlendMode::Disabled,
                dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            },
        }
    }

    /// Fragment stage
    pub fn fragment(mut self, module: &'a ShaderModule) -> Self {
        self.desc.fragment = Some((module.handle(), ENTRY_POINT));
        self
    }

    /// Primitive topology
    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.desc.topology = topology;
        self
    }

    /// Polygon fill mode
    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.desc.polygon_mode = mode;
        self
    }

    /// Face culling and winding
    pub fn cull(mut self, mode: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.desc.cull_mode = mode;
        self.desc.front_face = front_face;
        self
    }

    /// Colour attachment formats in location order
    pub fn color_formats(mut self, formats: &[vk::Format]) -> Self {
        self.desc.color_formats = formats.to_vec();
        self
    }

    /// Depth attachment with the given test and write enable
    pub fn depth(mut self, format: vk::Format, compare: vk::CompareOp, write: bool) -> Self {
        self.desc.depth_format = format;
        self.desc.depth_compare = Some(compare);
        self.desc.depth_write = write;
        self
    }

    /// Depth bias with dynamic constant/slope values
    pub fn dynamic_depth_bias(mut self) -> Self {
        self.desc.depth_bias = true;
        self.desc.dynamic_states.push(vk::DynamicState::DEPTH_BIAS);
        self
    }

    /// Dynamic line width
    pub fn dynamic_line_width(mut self) -> Self {
        self.desc.dynamic_states.push(vk::DynamicState::LINE_WIDTH);
        self
    }

    /// Colour blending
    pub fn blend(mut self, blend: BlendMode) -> Self {
        self.desc.blend = blend;
        self
    }

    /// Description built so far
    pub fn desc(&self) -> &GraphicsPipelineDesc<'a> {
        &self.desc
    }

    /// Create the pipeline
    pub fn build(self, device: &Arc<dyn GpuDevice>) -> VulkanResult<Pipeline> {
        let pipeline = device.create_graphics_pipeline(&self.desc)?;
        Ok(Pipeline {
            device: Arc::clone(device),
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::rendering::shader::ShaderBinary;
    use crate::render::backends::vulkan::testing::MockGpu;

    #[test]
    fn test_builder_accumulates_dynamic_state() {
        let gpu = MockGpu::new();
        let layout = PipelineLayout::new(&gpu.device, &[], vk::ShaderStageFlags::VERTEX, 16).unwrap();
        let module = ShaderModule::new(&gpu.device, &ShaderBinary::new("v", vec![0x0723_0203], None)).unwrap();

        let builder = GraphicsPipelineBuilder::new(&layout, &module)
            .depth(vk::Format::D32_SFLOAT, vk::CompareOp::GREATER_OR_EQUAL, true)
            .dynamic_depth_bias();

        let desc = builder.desc();
        assert!(desc.depth_bias);
        assert!(desc.fragment.is_none());
        assert_eq!(desc.depth_compare, Some(vk::CompareOp::GREATER_OR_EQUAL));
        assert!(desc.dynamic_states.contains(&vk::DynamicState::DEPTH_BIAS));
    }

    #[test]
    fn test_handles_destroyed_on_drop() {
        let gpu = MockGpu::new();
        {
            let layout = PipelineLayout::new(&gpu.device, &[], vk::ShaderStageFlags::COMPUTE, 0).unwrap();
            let module = ShaderModule::new(&gpu.device, &ShaderBinary::new("c", vec![0x0723_0203], None)).unwrap();
            let _pipeline = Pipeline::compute(&gpu.device, &layout, &module).unwrap();
        }
        assert!(gpu.mock.leaked_kinds().is_empty(), "{:?}", gpu.mock.leaked_kinds());
    }
}
