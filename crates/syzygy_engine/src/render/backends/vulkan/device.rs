//! Graphics binding seam
//!
//! The frame ring, staged buffers, descriptor pools and shadow pass never call the graphics
//! API directly. They go through [`GpuDevice`], which names exactly the operations the
//! rendering core needs: object lifetime, queue submission and presentation, swapchain
//! management and command recording. [`AshDevice`](super::initialization::AshDevice) is the
//! production implementation; tests drive the same protocol against a recording mock.
//!
//! Handles are plain `ash::vk` handle types so that both sides share one vocabulary.

use ash::vk;
use std::ffi::CStr;

use super::error::VulkanResult;

/// Result of asking the swapchain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; the semaphore will be signaled when it is ready
    Acquired {
        /// Index into the swapchain image list
        image_index: u32,
        /// The swapchain still works but no longer matches the surface exactly
        suboptimal: bool,
    },
    /// The swapchain no longer matches the surface and must be recreated
    OutOfDate,
}

/// Result of presenting a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Image queued for presentation
    Presented {
        /// The swapchain still works but no longer matches the surface exactly
        suboptimal: bool,
    },
    /// The swapchain no longer matches the surface and must be recreated
    OutOfDate,
}

/// Swapchain handle plus the images it owns
#[derive(Debug, Clone)]
pub struct SwapchainImages {
    /// Swapchain handle
    pub handle: vk::SwapchainKHR,
    /// Presentable images, owned by the swapchain
    pub images: Vec<vk::Image>,
    /// Image format
    pub format: vk::Format,
    /// Image extent
    pub extent: vk::Extent2D,
}

/// One queue submission with optional single wait/signal semaphores
#[derive(Debug, Clone, Copy)]
pub struct QueueSubmission {
    /// Command buffer to execute
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore to wait on, and the stage that waits
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags2)>,
    /// Semaphore to signal, and the stage after which it is signaled
    pub signal: Option<(vk::Semaphore, vk::PipelineStageFlags2)>,
    /// Fence signaled when the command buffer completes
    pub fence: vk::Fence,
}

/// Declarative description of one descriptor set layout binding
#[derive(Debug, Clone, Default)]
pub struct LayoutBinding {
    /// Binding slot
    pub binding: u32,
    /// Descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Number of descriptors (array length, or upper bound for variable count)
    pub count: u32,
    /// Shader stages that see the binding
    pub stage_flags: vk::ShaderStageFlags,
    /// Per-binding flags such as partially bound or variable count
    pub binding_flags: vk::DescriptorBindingFlags,
    /// Immutable samplers embedded in the layout
    pub immutable_samplers: Vec<vk::Sampler>,
}

/// Descriptor update for one binding
#[derive(Debug, Clone, Default)]
pub struct DescriptorWrite {
    /// Set to update
    pub set: vk::DescriptorSet,
    /// Binding slot
    pub binding: u32,
    /// First array element written
    pub array_element: u32,
    /// Descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Image descriptors (images, samplers, combined)
    pub images: Vec<vk::DescriptorImageInfo>,
    /// Buffer descriptors
    pub buffers: Vec<vk::DescriptorBufferInfo>,
}

/// Image view creation parameters
#[derive(Debug, Clone, Copy)]
pub struct ImageViewDesc {
    /// Image the view looks at
    pub image: vk::Image,
    /// View format
    pub format: vk::Format,
    /// Aspect of the image exposed through the view
    pub aspect: vk::ImageAspectFlags,
    /// View type
    pub view_type: vk::ImageViewType,
}

/// Colour blending applied to every colour attachment of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Write colour unmodified
    #[default]
    Disabled,
    /// Standard alpha blending
    Alpha,
    /// Additive blending
    Additive,
}

/// Fixed-function and attachment configuration of a dynamic-rendering graphics pipeline
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc<'a> {
    /// Pipeline layout
    pub layout: vk::PipelineLayout,
    /// Vertex shader module and entry point
    pub vertex: (vk::ShaderModule, &'a CStr),
    /// Fragment shader module and entry point, absent for depth-only pipelines
    pub fragment: Option<(vk::ShaderModule, &'a CStr)>,
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Polygon fill mode
    pub polygon_mode: vk::PolygonMode,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Winding of front faces
    pub front_face: vk::FrontFace,
    /// Formats of the colour attachments, in attachment order
    pub color_formats: Vec<vk::Format>,
    /// Depth attachment format, `UNDEFINED` for none
    pub depth_format: vk::Format,
    /// Depth test comparison, `None` disables the test
    pub depth_compare: Option<vk::CompareOp>,
    /// Whether depth writes are enabled
    pub depth_write: bool,
    /// Whether depth bias is enabled (values are dynamic state)
    pub depth_bias: bool,
    /// Colour blending
    pub blend: BlendMode,
    /// Dynamic state, viewport and scissor are always dynamic
    pub dynamic_states: Vec<vk::DynamicState>,
}

/// One attachment of a dynamic rendering pass
#[derive(Clone, Copy)]
pub struct AttachmentInfo {
    /// View rendered into
    pub view: vk::ImageView,
    /// Layout the image is in while rendering
    pub layout: vk::ImageLayout,
    /// Load operation
    pub load_op: vk::AttachmentLoadOp,
    /// Store operation
    pub store_op: vk::AttachmentStoreOp,
    /// Clear value used when `load_op` is `CLEAR`
    pub clear: vk::ClearValue,
}

impl std::fmt::Debug for AttachmentInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentInfo")
            .field("view", &self.view)
            .field("layout", &self.layout)
            .field("load_op", &self.load_op)
            .field("store_op", &self.store_op)
            .finish_non_exhaustive()
    }
}

impl AttachmentInfo {
    /// Attachment that keeps its previous contents
    pub fn load(view: vk::ImageView, layout: vk::ImageLayout) -> Self {
        Self {
            view,
            layout,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            clear: vk::ClearValue::default(),
        }
    }

    /// Colour attachment cleared to `color` before rendering
    pub fn clear_color(view: vk::ImageView, layout: vk::ImageLayout, color: [f32; 4]) -> Self {
        Self {
            view,
            layout,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear: vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            },
        }
    }

    /// Depth attachment cleared to `depth` before rendering
    pub fn clear_depth(view: vk::ImageView, layout: vk::ImageLayout, depth: f32) -> Self {
        Self {
            view,
            layout,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
            },
        }
    }
}

/// Attachments and area of one dynamic rendering pass
#[derive(Debug, Clone)]
pub struct RenderingAttachments {
    /// Area rendered into
    pub render_area: vk::Rect2D,
    /// Colour attachments in location order
    pub color: Vec<AttachmentInfo>,
    /// Optional depth attachment
    pub depth: Option<AttachmentInfo>,
}

/// The explicit graphics API operations the rendering core depends on
///
/// Creation calls return raw handles; ownership is taken by the RAII wrappers in
/// `resources` and `state`, which call the matching `destroy_*` exactly once.
/// `cmd_*` calls record into a command buffer that is in the recording state.
pub trait GpuDevice {
    // Synchronization
    /// Create a fence, optionally already signaled
    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence>;
    /// Destroy a fence
    fn destroy_fence(&self, fence: vk::Fence);
    /// Block until the fence is signaled or `timeout_ns` expires
    ///
    /// Expiry is reported as [`VulkanError::FenceTimeout`](super::error::VulkanError::FenceTimeout).
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<()>;
    /// Return a fence to the unsignaled state
    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()>;
    /// Create a binary semaphore
    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore>;
    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    /// Block until all queues are idle
    fn wait_idle(&self) -> VulkanResult<()>;

    // Command buffers and submission
    /// Create a resettable command pool on the graphics queue family
    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool>;
    /// Destroy a command pool and every buffer allocated from it
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    /// Allocate one primary command buffer
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer>;
    /// Reset a command buffer to the initial state
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;
    /// Begin one-time-submit recording
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;
    /// Finish recording
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;
    /// Submit to the graphics queue
    fn queue_submit(&self, submission: &QueueSubmission) -> VulkanResult<()>;

    // Memory-adjacent queries
    /// Query the device address of a buffer created with address support
    fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress;

    // Images and samplers
    /// Create an image view covering mip 0 / layer 0
    fn create_image_view(&self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView>;
    /// Destroy an image view
    fn destroy_image_view(&self, view: vk::ImageView);
    /// Create a sampler
    fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> VulkanResult<vk::Sampler>;
    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // Descriptors
    /// Create a descriptor set layout
    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> VulkanResult<vk::DescriptorSetLayout>;
    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    /// Create a descriptor pool
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
        flags: vk::DescriptorPoolCreateFlags,
    ) -> VulkanResult<vk::DescriptorPool>;
    /// Destroy a descriptor pool
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    /// Return every set of the pool to it
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()>;
    /// Allocate one set, with a variable descriptor count for the last binding if given
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        variable_count: Option<u32>,
    ) -> VulkanResult<vk::DescriptorSet>;
    /// Apply descriptor writes
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);

    // Pipelines
    /// Create a shader module from SPIR-V words
    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule>;
    /// Destroy a shader module
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    /// Create a pipeline layout
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout>;
    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    /// Create a graphics pipeline for dynamic rendering
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> VulkanResult<vk::Pipeline>;
    /// Create a compute pipeline
    fn create_compute_pipeline(
        &self,
        layout: vk::PipelineLayout,
        module: vk::ShaderModule,
        entry_point: &CStr,
    ) -> VulkanResult<vk::Pipeline>;
    /// Destroy a pipeline
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // Presentation
    /// Create a swapchain for the surface, replacing `old` if not null
    fn create_swapchain(
        &self,
        extent: vk::Extent2D,
        old: vk::SwapchainKHR,
    ) -> VulkanResult<SwapchainImages>;
    /// Destroy a swapchain
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Acquire the next presentable image, signaling `semaphore` when it is ready
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> VulkanResult<AcquireOutcome>;
    /// Queue an image for presentation after `wait_semaphore` is signaled
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VulkanResult<PresentOutcome>;

    // Command recording
    /// Record a synchronization2 pipeline barrier
    fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        memory_barriers: &[vk::MemoryBarrier2],
        buffer_barriers: &[vk::BufferMemoryBarrier2],
        image_barriers: &[vk::ImageMemoryBarrier2],
    );
    /// Copy between buffers
    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    /// Clear a depth image outside a rendering pass
    fn cmd_clear_depth_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: vk::ClearDepthStencilValue,
        range: vk::ImageSubresourceRange,
    );
    /// Clear a colour image outside a rendering pass
    fn cmd_clear_color_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: vk::ClearColorValue,
        range: vk::ImageSubresourceRange,
    );
    /// Blit with scaling and format conversion
    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::ImageBlit,
        filter: vk::Filter,
    );
    /// Begin a dynamic rendering pass
    fn cmd_begin_rendering(&self, command_buffer: vk::CommandBuffer, attachments: &RenderingAttachments);
    /// End the current dynamic rendering pass
    fn cmd_end_rendering(&self, command_buffer: vk::CommandBuffer);
    /// Bind a pipeline
    fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    /// Bind descriptor sets starting at `first_set`
    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    /// Update push constants
    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    );
    /// Set the dynamic viewport
    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport);
    /// Set the dynamic scissor
    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D);
    /// Set dynamic depth bias
    fn cmd_set_depth_bias(&self, command_buffer: vk::CommandBuffer, constant: f32, clamp: f32, slope: f32);
    /// Set dynamic line width
    fn cmd_set_line_width(&self, command_buffer: vk::CommandBuffer, width: f32);
    /// Bind an index buffer
    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    /// Non-indexed draw
    fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    /// Indexed draw
    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    /// Compute dispatch
    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32);
}
