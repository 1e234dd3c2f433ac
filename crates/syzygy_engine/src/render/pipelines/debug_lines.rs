//! Debug line overlay drawn over the lit image
//!
//! Lines are depth tested against the G-buffer depth but never write it.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use super::load_validated;
use crate::render::backends::vulkan::device::{AttachmentInfo, BlendMode, RenderingAttachments};
use crate::render::backends::vulkan::{
    CommandRecorder, GpuDevice, GraphicsPipelineBuilder, Pipeline, PipelineLayout, ShaderLibrary, ShaderModule,
    VulkanResult,
};

/// Vertex shader of the debug line pass
pub const DEBUG_LINE_VERTEX_SHADER: &str = "debug_lines.vert";
/// Fragment shader of the debug line pass
pub const DEBUG_LINE_FRAGMENT_SHADER: &str = "debug_lines.frag";

/// Push constants of the debug line draw
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DebugLinePushConstants {
    /// Line vertex array
    pub vertex_buffer: vk::DeviceAddress,
    /// Camera array
    pub camera_buffer: vk::DeviceAddress,
    /// Camera to render through
    pub camera_index: u32,
    /// Keeps the block a multiple of 8 bytes
    pub padding: u32,
}

/// Line-list pipeline with dynamic width
pub struct DebugLinePipeline {
    pipeline: Pipeline,
    layout: PipelineLayout,
}

impl DebugLinePipeline {
    /// Build for a colour target of `color_format` tested against `depth_format`
    pub fn new(
        device: &Arc<dyn GpuDevice>,
        shaders: &dyn ShaderLibrary,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> VulkanResult<Self> {
        let vertex_binary = load_validated::<DebugLinePushConstants>(shaders, DEBUG_LINE_VERTEX_SHADER)?;
        let fragment_binary = shaders.load(DEBUG_LINE_FRAGMENT_SHADER)?;
        let vertex = ShaderModule::new(device, &vertex_binary)?;
        let fragment = ShaderModule::new(device, &fragment_binary)?;

        let layout = PipelineLayout::new(
            device,
            &[],
            vk::ShaderStageFlags::VERTEX,
            std::mem::size_of::<DebugLinePushConstants>() as u32,
        )?;
        let pipeline = GraphicsPipelineBuilder::new(&layout, &vertex)
            .fragment(&fragment)
            .topology(vk::PrimitiveTopology::LINE_LIST)
            .color_formats(&[color_format])
            .depth(depth_format, vk::CompareOp::GREATER_OR_EQUAL, false)
            .blend(BlendMode::Alpha)
            .dynamic_line_width()
            .build(device)?;

        Ok(Self { pipeline, layout })
    }

    /// Draw `vertex_count` line vertices over `color`, tested against `depth`
    ///
    /// Records nothing when there are no lines.
    #[allow(clippy::too_many_arguments)]
    pub fn record_draw_commands(
        &self,
        recorder: &mut CommandRecorder<'_>,
        color: vk::ImageView,
        depth: vk::ImageView,
        extent: vk::Extent2D,
        line_width: f32,
        vertex_count: u32,
        push: &DebugLinePushConstants,
    ) {
        if vertex_count == 0 {
            return;
        }
        recorder.begin_rendering(&RenderingAttachments {
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            color: vec![AttachmentInfo::load(color, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)],
            depth: Some(AttachmentInfo::load(depth, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)),
        });
        recorder.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle());
        recorder.set_viewport_and_scissor(extent);
        recorder.set_line_width(line_width);
        recorder.push_constants(self.layout.handle(), vk::ShaderStageFlags::VERTEX, push);
        recorder.draw(vertex_count, 1);
        recorder.end_rendering();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::testing::{Command, MockGpu, MockShaderLibrary};

    #[test]
    fn test_lines_drawn_with_requested_width() {
        let gpu = MockGpu::new();
        let library = MockShaderLibrary::new()
            .with_push_size(DEBUG_LINE_VERTEX_SHADER, 24)
            .with_push_size(DEBUG_LINE_FRAGMENT_SHADER, 0);
        let pipeline = DebugLinePipeline::new(
            &gpu.device,
            &library,
            vk::Format::R16G16B16A16_SFLOAT,
            vk::Format::D32_SFLOAT,
        )
        .unwrap();
        let cmd = gpu.begin_commands();
        let mut recorder = CommandRecorder::new(gpu.device.as_ref(), cmd);
        let extent = vk::Extent2D { width: 32, height: 32 };
        let push = DebugLinePushConstants::default();

        pipeline.record_draw_commands(&mut recorder, vk::ImageView::null(), vk::ImageView::null(), extent, 2.0, 0, &push);
        assert!(gpu.mock.recorded(cmd).is_empty());

        pipeline.record_draw_commands(&mut recorder, vk::ImageView::null(), vk::ImageView::null(), extent, 2.0, 6, &push);
        let commands = gpu.mock.recorded(cmd);
        assert!(commands.contains(&Command::SetLineWidth(2.0)));
        assert!(commands.contains(&Command::Draw { vertex_count: 6, instance_count: 1 }));
        assert_eq!(recorder.counters().draw_calls, 1);
    }
}
