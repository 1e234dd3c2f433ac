//! Command recording
//!
//! [`CommandRecorder`] is a borrowed view of one command buffer in the recording state. All
//! per-frame recording goes through it so that draw statistics are counted in one place.

use ash::vk;

use crate::render::backends::vulkan::device::{GpuDevice, RenderingAttachments};

/// Draw work recorded into one command buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawCounters {
    /// Draw calls issued
    pub draw_calls: u32,
    /// Vertices submitted by non-indexed draws
    pub vertices: u64,
    /// Indices submitted by indexed draws
    pub indices: u64,
    /// Compute dispatches issued
    pub dispatches: u32,
}

/// Records commands into a command buffer that has been begun
pub struct CommandRecorder<'a> {
    device: &'a dyn GpuDevice,
    command_buffer: vk::CommandBuffer,
    counters: DrawCounters,
}

impl<'a> CommandRecorder<'a> {
    /// Wrap a command buffer that is already in the recording state
    pub fn new(device: &'a dyn GpuDevice, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            device,
            command_buffer,
            counters: DrawCounters::default(),
        }
    }

    /// Raw command buffer handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Device the commands are recorded for
    pub fn device(&self) -> &'a dyn GpuDevice {
        self.device
    }

    /// Draw work recorded so far
    pub fn counters(&self) -> DrawCounters {
        self.counters
    }

    /// Synchronization2 barrier
    pub fn pipeline_barrier(
        &mut self,
        memory: &[vk::MemoryBarrier2],
        buffers: &[vk::BufferMemoryBarrier2],
        images: &[vk::ImageMemoryBarrier2],
    ) {
        if memory.is_empty() && buffers.is_empty() && images.is_empty() {
            return;
        }
        self.device
            .cmd_pipeline_barrier(self.command_buffer, memory, buffers, images);
    }

    /// Buffer to buffer copy of `size` bytes from the start of both buffers
    pub fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        self.device
            .cmd_copy_buffer(self.command_buffer, src, dst, &[region]);
    }

    /// Copy arbitrary regions between buffers
    pub fn copy_buffer_regions(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.device
            .cmd_copy_buffer(self.command_buffer, src, dst, regions);
    }

    /// Clear the depth aspect of an image in `layout`
    pub fn clear_depth_image(&mut self, image: vk::Image, layout: vk::ImageLayout, depth: f32) {
        self.device.cmd_clear_depth_image(
            self.command_buffer,
            image,
            layout,
            vk::ClearDepthStencilValue { depth, stencil: 0 },
            subresource_range(vk::ImageAspectFlags::DEPTH),
        );
    }

    /// Clear the colour aspect of an image in `layout`
    pub fn clear_color_image(&mut self, image: vk::Image, layout: vk::ImageLayout, color: [f32; 4]) {
        self.device.cmd_clear_color_image(
            self.command_buffer,
            image,
            layout,
            vk::ClearColorValue { float32: color },
            subresource_range(vk::ImageAspectFlags::COLOR),
        );
    }

    /// Blit between images with linear filtering
    pub fn blit_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::ImageBlit,
    ) {
        self.device.cmd_blit_image(
            self.command_buffer,
            src,
            src_layout,
            dst,
            dst_layout,
            region,
            vk::Filter::LINEAR,
        );
    }

    /// Begin dynamic rendering
    pub fn begin_rendering(&mut self, attachments: &RenderingAttachments) {
        self.device
            .cmd_begin_rendering(self.command_buffer, attachments);
    }

    /// End dynamic rendering
    pub fn end_rendering(&mut self) {
        self.device.cmd_end_rendering(self.command_buffer);
    }

    /// Bind a pipeline
    pub fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.device
            .cmd_bind_pipeline(self.command_buffer, bind_point, pipeline);
    }

    /// Bind descriptor sets starting at `first_set`
    pub fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.device
            .cmd_bind_descriptor_sets(self.command_buffer, bind_point, layout, first_set, sets);
    }

    /// Push a plain-data block at offset 0
    pub fn push_constants<T: bytemuck::Pod>(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, value: &T) {
        self.push_constant_bytes(layout, stages, bytemuck::bytes_of(value));
    }

    /// Push raw bytes at offset 0
    pub fn push_constant_bytes(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.device
            .cmd_push_constants(self.command_buffer, layout, stages, 0, bytes);
    }

    /// Set a viewport and scissor covering `extent`
    pub fn set_viewport_and_scissor(&mut self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        self.device.cmd_set_viewport(self.command_buffer, viewport);
        self.device.cmd_set_scissor(self.command_buffer, scissor);
    }

    /// Set dynamic depth bias
    pub fn set_depth_bias(&mut self, constant: f32, slope: f32) {
        self.device
            .cmd_set_depth_bias(self.command_buffer, constant, 0.0, slope);
    }

    /// Set dynamic line width
    pub fn set_line_width(&mut self, width: f32) {
        self.device.cmd_set_line_width(self.command_buffer, width);
    }

    /// Bind a 32-bit index buffer
    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        self.device
            .cmd_bind_index_buffer(self.command_buffer, buffer, 0, vk::IndexType::UINT32);
    }

    /// Non-indexed draw
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.device
            .cmd_draw(self.command_buffer, vertex_count, instance_count, 0, 0);
        self.counters.draw_calls += 1;
        self.counters.vertices += u64::from(vertex_count) * u64::from(instance_count);
    }

    /// Indexed draw over `index_count` indices starting at `first_index`
    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32) {
        self.device.cmd_draw_indexed(
            self.command_buffer,
            index_count,
            instance_count,
            first_index,
            0,
            0,
        );
        self.counters.draw_calls += 1;
        self.counters.indices += u64::from(index_count) * u64::from(instance_count);
    }

    /// Compute dispatch
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.device.cmd_dispatch(self.command_buffer, x, y, z);
        self.counters.dispatches += 1;
    }

    /// Dispatch enough 16x16 workgroups to cover `extent`
    pub fn dispatch_2d(&mut self, extent: vk::Extent2D) {
        self.dispatch(extent.width.div_ceil(16), extent.height.div_ceil(16), 1);
    }
}

/// Subresource range covering mip 0 and layer 0 of `aspect`
pub fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}
