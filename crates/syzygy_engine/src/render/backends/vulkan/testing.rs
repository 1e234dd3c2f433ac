//! Recording doubles for the graphics binding
//!
//! `MockDevice` implements [`GpuDevice`] without a GPU: it hands out unique handles, counts
//! paired create/destroy calls per object kind, simulates fences (a submitted fence signals
//! the next time the CPU waits on it) and records every command so tests can inspect the
//! exact sequence a frame produced. `MockAllocator` backs allocations with host memory.
//! `MockShaderLibrary` serves placeholder SPIR-V with push-constant blocks of chosen layouts.

use ash::vk::{self, Handle};
use slotmap::SlotMap;
use std::collections::{HashMap, VecDeque};
use std::ffi::CStr;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

use super::device::{
    AcquireOutcome, DescriptorWrite, GpuDevice, GraphicsPipelineDesc, ImageViewDesc, LayoutBinding,
    PresentOutcome, QueueSubmission, RenderingAttachments, SwapchainImages,
};
use super::error::{VulkanError, VulkanResult};
use super::rendering::reflection::{ReflectedType, ScalarKind};
use super::rendering::shader::{ShaderBinary, ShaderLibrary};
use super::resources::allocator::{AllocationId, BufferAllocation, ImageAllocation, MemoryAllocator, MemoryPolicy};

/// One recorded command
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Barrier {
        images: Vec<(vk::Image, vk::ImageLayout, vk::ImageLayout)>,
        buffers: Vec<(vk::Buffer, vk::DeviceSize, vk::PipelineStageFlags2, vk::AccessFlags2)>,
    },
    CopyBuffer { src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize },
    ClearDepth { image: vk::Image, layout: vk::ImageLayout, depth: f32 },
    ClearColor { image: vk::Image, layout: vk::ImageLayout },
    Blit { src: vk::Image, dst: vk::Image },
    BeginRendering { color: Vec<vk::ImageView>, depth: Option<vk::ImageView> },
    EndRendering,
    BindPipeline(vk::Pipeline),
    BindDescriptorSets { first_set: u32, sets: Vec<vk::DescriptorSet> },
    PushConstants(Vec<u8>),
    SetViewport,
    SetScissor,
    SetDepthBias { constant: f32, slope: f32 },
    SetLineWidth(f32),
    BindIndexBuffer(vk::Buffer),
    Draw { vertex_count: u32, instance_count: u32 },
    DrawIndexed { index_count: u32, instance_count: u32 },
    Dispatch(u32, u32, u32),
}

/// Host-side events relevant to synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    ResetCommandBuffer(vk::CommandBuffer),
    Submit { command_buffer: vk::CommandBuffer, fence: vk::Fence },
    Acquire(vk::SwapchainKHR),
    Present { swapchain: vk::SwapchainKHR, image_index: u32 },
    WaitIdle,
    CreateSwapchain(vk::Extent2D),
    ResetDescriptorPool(vk::DescriptorPool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    // Submitted work that completes the next time the CPU waits on it
    Pending,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    created: HashMap<&'static str, usize>,
    destroyed: HashMap<&'static str, usize>,
    fences: HashMap<vk::Fence, FenceState>,
    last_submit_fence: HashMap<vk::CommandBuffer, vk::Fence>,
    recording: HashMap<vk::CommandBuffer, Vec<Command>>,
    submitted: Vec<(vk::CommandBuffer, Vec<Command>)>,
    events: Vec<Event>,
    violations: Vec<String>,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    swapchain_image_count: u32,
    next_image: u32,
    descriptor_pools: HashMap<vk::DescriptorPool, (u32, u32)>,
    variable_counts: HashMap<vk::DescriptorSet, Option<u32>>,
    descriptor_writes: Vec<DescriptorWrite>,
    stalled_fences: bool,
}

/// [`GpuDevice`] double that records instead of executing
pub(crate) struct MockDevice {
    state: Mutex<MockState>,
}

impl MockDevice {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_handle: 1,
                swapchain_image_count: 3,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn make<H: Handle>(&self, kind: &'static str) -> H {
        let mut state = self.state();
        let raw = state.next_handle;
        state.next_handle += 1;
        *state.created.entry(kind).or_default() += 1;
        H::from_raw(raw)
    }

    fn release(&self, kind: &'static str) {
        *self.state().destroyed.entry(kind).or_default() += 1;
    }

    fn record(&self, command_buffer: vk::CommandBuffer, command: Command) {
        let mut state = self.state();
        if let Some(commands) = state.recording.get_mut(&command_buffer) {
            commands.push(command);
        } else {
            state
                .violations
                .push(format!("{command:?} recorded into {command_buffer:?} outside begin/end"));
        }
    }

    /// Number of `kind` objects created so far
    pub(crate) fn created(&self, kind: &str) -> usize {
        self.state().created.get(kind).copied().unwrap_or(0)
    }

    /// Number of `kind` objects destroyed so far
    pub(crate) fn destroyed(&self, kind: &str) -> usize {
        self.state().destroyed.get(kind).copied().unwrap_or(0)
    }

    /// Objects of `kind` that are currently alive
    pub(crate) fn live(&self, kind: &str) -> usize {
        self.created(kind) - self.destroyed(kind)
    }

    /// Object kinds with more creations than destructions
    pub(crate) fn leaked_kinds(&self) -> Vec<(&'static str, usize)> {
        let state = self.state();
        let mut leaked: Vec<_> = state
            .created
            .iter()
            .filter_map(|(kind, created)| {
                let destroyed = state.destroyed.get(kind).copied().unwrap_or(0);
                (*created > destroyed).then(|| (*kind, created - destroyed))
            })
            .collect();
        leaked.sort_unstable();
        leaked
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub(crate) fn violations(&self) -> Vec<String> {
        self.state().violations.clone()
    }

    /// Command lists in submission order
    pub(crate) fn submitted(&self) -> Vec<(vk::CommandBuffer, Vec<Command>)> {
        self.state().submitted.clone()
    }

    /// Commands of the most recent submission
    pub(crate) fn last_submitted_commands(&self) -> Vec<Command> {
        self.state().submitted.last().map(|(_, c)| c.clone()).unwrap_or_default()
    }

    /// Commands recorded so far into a buffer that has not been submitted yet
    pub(crate) fn recorded(&self, command_buffer: vk::CommandBuffer) -> Vec<Command> {
        self.state().recording.get(&command_buffer).cloned().unwrap_or_default()
    }

    pub(crate) fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        self.state().descriptor_writes.clone()
    }

    pub(crate) fn variable_count(&self, set: vk::DescriptorSet) -> Option<u32> {
        self.state().variable_counts.get(&set).copied().flatten()
    }

    pub(crate) fn script_acquire(&self, outcome: AcquireOutcome) {
        self.state().acquire_script.push_back(outcome);
    }

    pub(crate) fn script_present(&self, outcome: PresentOutcome) {
        self.state().present_script.push_back(outcome);
    }

    /// Make every pending fence miss its wait deadline
    pub(crate) fn stall_fences(&self) {
        self.state().stalled_fences = true;
    }

    pub(crate) fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state().fences.get(&fence) == Some(&FenceState::Signaled)
    }
}

impl GpuDevice for MockDevice {
    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let fence: vk::Fence = self.make("fence");
        let initial = if signaled { FenceState::Signaled } else { FenceState::Unsignaled };
        self.state().fences.insert(fence, initial);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        if state.fences.get(&fence) == Some(&FenceState::Pending) {
            state.violations.push(format!("fence {fence:?} destroyed while its work is in flight"));
        }
        state.fences.remove(&fence);
        drop(state);
        self.release("fence");
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<()> {
        let mut state = self.state();
        state.events.push(Event::WaitFence(fence));
        let stalled = state.stalled_fences;
        match state.fences.get_mut(&fence) {
            Some(fence_state @ FenceState::Pending) if !stalled => {
                *fence_state = FenceState::Signaled;
                Ok(())
            }
            Some(FenceState::Signaled) => Ok(()),
            Some(_) => Err(VulkanError::FenceTimeout { what: "mock fence", timeout_ns }),
            None => Err(VulkanError::InvalidOperation {
                reason: format!("wait on unknown fence {fence:?}"),
            }),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        let mut state = self.state();
        state.events.push(Event::ResetFence(fence));
        if state.fences.get(&fence) == Some(&FenceState::Pending) {
            state.violations.push(format!("fence {fence:?} reset while its work is in flight"));
        }
        state.fences.insert(fence, FenceState::Unsignaled);
        Ok(())
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        Ok(self.make("semaphore"))
    }

    fn destroy_semaphore(&self, _semaphore: vk::Semaphore) {
        self.release("semaphore");
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        let mut state = self.state();
        state.events.push(Event::WaitIdle);
        for fence_state in state.fences.values_mut() {
            if *fence_state == FenceState::Pending {
                *fence_state = FenceState::Signaled;
            }
        }
        Ok(())
    }

    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool> {
        Ok(self.make("command_pool"))
    }

    fn destroy_command_pool(&self, _pool: vk::CommandPool) {
        self.release("command_pool");
    }

    fn allocate_command_buffer(&self, _pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer> {
        let mut state = self.state();
        let raw = state.next_handle;
        state.next_handle += 1;
        Ok(vk::CommandBuffer::from_raw(raw))
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let mut state = self.state();
        state.events.push(Event::ResetCommandBuffer(command_buffer));
        if let Some(fence) = state.last_submit_fence.get(&command_buffer).copied() {
            if state.fences.get(&fence) == Some(&FenceState::Pending) {
                state
                    .violations
                    .push(format!("command buffer {command_buffer:?} reset while fence {fence:?} is unsignaled"));
            }
        }
        state.recording.remove(&command_buffer);
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let mut state = self.state();
        if state.recording.contains_key(&command_buffer) {
            state.violations.push(format!("{command_buffer:?} begun twice"));
        }
        state.recording.insert(command_buffer, Vec::new());
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        if self.state().recording.contains_key(&command_buffer) {
            Ok(())
        } else {
            Err(VulkanError::InvalidOperation {
                reason: format!("{command_buffer:?} ended without begin"),
            })
        }
    }

    fn queue_submit(&self, submission: &QueueSubmission) -> VulkanResult<()> {
        let mut state = self.state();
        let commands = state.recording.remove(&submission.command_buffer).unwrap_or_default();
        state.events.push(Event::Submit {
            command_buffer: submission.command_buffer,
            fence: submission.fence,
        });
        if submission.fence != vk::Fence::null() {
            if state.fences.get(&submission.fence) != Some(&FenceState::Unsignaled) {
                state
                    .violations
                    .push(format!("submit with fence {:?} that was not reset", submission.fence));
            }
            state.fences.insert(submission.fence, FenceState::Pending);
            state.last_submit_fence.insert(submission.command_buffer, submission.fence);
        }
        state.submitted.push((submission.command_buffer, commands));
        Ok(())
    }

    fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        buffer.as_raw() << 16
    }

    fn create_image_view(&self, _desc: &ImageViewDesc) -> VulkanResult<vk::ImageView> {
        Ok(self.make("image_view"))
    }

    fn destroy_image_view(&self, _view: vk::ImageView) {
        self.release("image_view");
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo) -> VulkanResult<vk::Sampler> {
        Ok(self.make("sampler"))
    }

    fn destroy_sampler(&self, _sampler: vk::Sampler) {
        self.release("sampler");
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[LayoutBinding],
        _flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        Ok(self.make("descriptor_set_layout"))
    }

    fn destroy_descriptor_set_layout(&self, _layout: vk::DescriptorSetLayout) {
        self.release("descriptor_set_layout");
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _sizes: &[vk::DescriptorPoolSize],
        _flags: vk::DescriptorPoolCreateFlags,
    ) -> VulkanResult<vk::DescriptorPool> {
        let pool: vk::DescriptorPool = self.make("descriptor_pool");
        self.state().descriptor_pools.insert(pool, (max_sets, 0));
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state().descriptor_pools.remove(&pool);
        self.release("descriptor_pool");
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()> {
        let mut state = self.state();
        state.events.push(Event::ResetDescriptorPool(pool));
        match state.descriptor_pools.get_mut(&pool) {
            Some((_, allocated)) => {
                *allocated = 0;
                Ok(())
            }
            None => Err(VulkanError::call("vkResetDescriptorPool", vk::Result::ERROR_UNKNOWN)),
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
        variable_count: Option<u32>,
    ) -> VulkanResult<vk::DescriptorSet> {
        let mut state = self.state();
        let Some((max_sets, allocated)) = state.descriptor_pools.get_mut(&pool) else {
            return Err(VulkanError::call("vkAllocateDescriptorSets", vk::Result::ERROR_UNKNOWN));
        };
        if *allocated >= *max_sets {
            return Err(VulkanError::call("vkAllocateDescriptorSets", vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        *allocated += 1;
        let raw = state.next_handle;
        state.next_handle += 1;
        let set = vk::DescriptorSet::from_raw(raw);
        state.variable_counts.insert(set, variable_count);
        Ok(set)
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        self.state().descriptor_writes.extend_from_slice(writes);
    }

    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        if code.is_empty() {
            return Err(VulkanError::call("vkCreateShaderModule", vk::Result::ERROR_INVALID_SHADER_NV));
        }
        Ok(self.make("shader_module"))
    }

    fn destroy_shader_module(&self, _module: vk::ShaderModule) {
        self.release("shader_module");
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        Ok(self.make("pipeline_layout"))
    }

    fn destroy_pipeline_layout(&self, _layout: vk::PipelineLayout) {
        self.release("pipeline_layout");
    }

    fn create_graphics_pipeline(&self, _desc: &GraphicsPipelineDesc<'_>) -> VulkanResult<vk::Pipeline> {
        Ok(self.make("pipeline"))
    }

    fn create_compute_pipeline(
        &self,
        _layout: vk::PipelineLayout,
        _module: vk::ShaderModule,
        _entry_point: &CStr,
    ) -> VulkanResult<vk::Pipeline> {
        Ok(self.make("pipeline"))
    }

    fn destroy_pipeline(&self, _pipeline: vk::Pipeline) {
        self.release("pipeline");
    }

    fn create_swapchain(&self, extent: vk::Extent2D, _old: vk::SwapchainKHR) -> VulkanResult<SwapchainImages> {
        let handle: vk::SwapchainKHR = self.make("swapchain");
        let mut state = self.state();
        state.events.push(Event::CreateSwapchain(extent));
        state.next_image = 0;
        let count = state.swapchain_image_count;
        let images = (0..count)
            .map(|_| {
                let raw = state.next_handle;
                state.next_handle += 1;
                vk::Image::from_raw(raw)
            })
            .collect();
        Ok(SwapchainImages {
            handle,
            images,
            format: vk::Format::B8G8R8A8_UNORM,
            extent,
        })
    }

    fn destroy_swapchain(&self, _swapchain: vk::SwapchainKHR) {
        self.release("swapchain");
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _semaphore: vk::Semaphore,
        _timeout_ns: u64,
    ) -> VulkanResult<AcquireOutcome> {
        let mut state = self.state();
        state.events.push(Event::Acquire(swapchain));
        if let Some(outcome) = state.acquire_script.pop_front() {
            return Ok(outcome);
        }
        let image_index = state.next_image;
        state.next_image = (state.next_image + 1) % state.swapchain_image_count;
        Ok(AcquireOutcome::Acquired { image_index, suboptimal: false })
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        _wait_semaphore: vk::Semaphore,
    ) -> VulkanResult<PresentOutcome> {
        let mut state = self.state();
        state.events.push(Event::Present { swapchain, image_index });
        Ok(state
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented { suboptimal: false }))
    }

    fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        _memory_barriers: &[vk::MemoryBarrier2],
        buffer_barriers: &[vk::BufferMemoryBarrier2],
        image_barriers: &[vk::ImageMemoryBarrier2],
    ) {
        let images = image_barriers
            .iter()
            .map(|b| (b.image, b.old_layout, b.new_layout))
            .collect();
        let buffers = buffer_barriers
            .iter()
            .map(|b| (b.buffer, b.size, b.dst_stage_mask, b.dst_access_mask))
            .collect();
        self.record(command_buffer, Command::Barrier { images, buffers });
    }

    fn cmd_copy_buffer(&self, command_buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        for region in regions {
            self.record(command_buffer, Command::CopyBuffer { src, dst, size: region.size });
        }
    }

    fn cmd_clear_depth_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: vk::ClearDepthStencilValue,
        _range: vk::ImageSubresourceRange,
    ) {
        self.record(command_buffer, Command::ClearDepth { image, layout, depth: value.depth });
    }

    fn cmd_clear_color_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        _value: vk::ClearColorValue,
        _range: vk::ImageSubresourceRange,
    ) {
        self.record(command_buffer, Command::ClearColor { image, layout });
    }

    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        _src_layout: vk::ImageLayout,
        dst: vk::Image,
        _dst_layout: vk::ImageLayout,
        _region: vk::ImageBlit,
        _filter: vk::Filter,
    ) {
        self.record(command_buffer, Command::Blit { src, dst });
    }

    fn cmd_begin_rendering(&self, command_buffer: vk::CommandBuffer, attachments: &RenderingAttachments) {
        self.record(
            command_buffer,
            Command::BeginRendering {
                color: attachments.color.iter().map(|a| a.view).collect(),
                depth: attachments.depth.map(|a| a.view),
            },
        );
    }

    fn cmd_end_rendering(&self, command_buffer: vk::CommandBuffer) {
        self.record(command_buffer, Command::EndRendering);
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, _bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.record(command_buffer, Command::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.record(command_buffer, Command::BindDescriptorSets { first_set, sets: sets.to_vec() });
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        _offset: u32,
        bytes: &[u8],
    ) {
        self.record(command_buffer, Command::PushConstants(bytes.to_vec()));
    }

    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, _viewport: vk::Viewport) {
        self.record(command_buffer, Command::SetViewport);
    }

    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, _scissor: vk::Rect2D) {
        self.record(command_buffer, Command::SetScissor);
    }

    fn cmd_set_depth_bias(&self, command_buffer: vk::CommandBuffer, constant: f32, _clamp: f32, slope: f32) {
        self.record(command_buffer, Command::SetDepthBias { constant, slope });
    }

    fn cmd_set_line_width(&self, command_buffer: vk::CommandBuffer, width: f32) {
        self.record(command_buffer, Command::SetLineWidth(width));
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        _index_type: vk::IndexType,
    ) {
        self.record(command_buffer, Command::BindIndexBuffer(buffer));
    }

    fn cmd_draw(&self, command_buffer: vk::CommandBuffer, vertex_count: u32, instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        self.record(command_buffer, Command::Draw { vertex_count, instance_count });
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.record(command_buffer, Command::DrawIndexed { index_count, instance_count });
    }

    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.record(command_buffer, Command::Dispatch(x, y, z));
    }
}

struct MockAllocation {
    // u64 backing keeps mapped memory 8-byte aligned for typed views
    memory: Vec<u64>,
}

#[derive(Default)]
struct AllocatorState {
    allocations: SlotMap<AllocationId, MockAllocation>,
    next_handle: u64,
    buffers_created: usize,
    buffers_destroyed: usize,
    images_created: usize,
    images_destroyed: usize,
    flushes: Vec<(AllocationId, vk::DeviceSize, vk::DeviceSize)>,
}

/// [`MemoryAllocator`] double backed by host memory
pub(crate) struct MockAllocator {
    state: Mutex<AllocatorState>,
}

impl MockAllocator {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(AllocatorState {
                // Disjoint from MockDevice handles
                next_handle: 1 << 32,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn live_buffers(&self) -> usize {
        let state = self.state();
        state.buffers_created - state.buffers_destroyed
    }

    pub(crate) fn live_images(&self) -> usize {
        let state = self.state();
        state.images_created - state.images_destroyed
    }

    pub(crate) fn images_created(&self) -> usize {
        self.state().images_created
    }

    pub(crate) fn flush_count(&self) -> usize {
        self.state().flushes.len()
    }
}

impl MemoryAllocator for MockAllocator {
    fn create_buffer(&self, info: &vk::BufferCreateInfo, policy: MemoryPolicy) -> VulkanResult<BufferAllocation> {
        let mut state = self.state();
        let words = usize::try_from(info.size.div_ceil(8)).unwrap();
        let mut memory = vec![0u64; words.max(1)];
        let mapped = policy.mapped.then(|| NonNull::new(memory.as_mut_ptr().cast::<u8>())).flatten();
        let allocation = state.allocations.insert(MockAllocation { memory });
        let buffer = vk::Buffer::from_raw(state.next_handle);
        state.next_handle += 1;
        state.buffers_created += 1;
        Ok(BufferAllocation { buffer, allocation, mapped })
    }

    fn destroy_buffer(&self, _buffer: vk::Buffer, allocation: AllocationId) {
        let mut state = self.state();
        assert!(state.allocations.remove(allocation).is_some(), "double free of {allocation:?}");
        state.buffers_destroyed += 1;
    }

    fn flush(&self, allocation: AllocationId, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()> {
        let mut state = self.state();
        let capacity = state.allocations.get(allocation).map(|a| a.memory.len() as u64 * 8);
        match capacity {
            Some(capacity) if offset + size <= capacity => {
                state.flushes.push((allocation, offset, size));
                Ok(())
            }
            _ => Err(VulkanError::InvalidOperation {
                reason: format!("flush out of range for {allocation:?}"),
            }),
        }
    }

    fn create_image(&self, _info: &vk::ImageCreateInfo, _policy: MemoryPolicy) -> VulkanResult<ImageAllocation> {
        let mut state = self.state();
        let allocation = state.allocations.insert(MockAllocation { memory: Vec::new() });
        let image = vk::Image::from_raw(state.next_handle);
        state.next_handle += 1;
        state.images_created += 1;
        Ok(ImageAllocation { image, allocation })
    }

    fn destroy_image(&self, _image: vk::Image, allocation: AllocationId) {
        let mut state = self.state();
        assert!(state.allocations.remove(allocation).is_some(), "double free of {allocation:?}");
        state.images_destroyed += 1;
    }
}

/// Fresh device/allocator pair, both as concrete mocks and as trait objects
pub(crate) struct MockGpu {
    pub(crate) mock: Arc<MockDevice>,
    pub(crate) memory: Arc<MockAllocator>,
    pub(crate) device: Arc<dyn GpuDevice>,
    pub(crate) allocator: Arc<dyn MemoryAllocator>,
}

impl MockGpu {
    pub(crate) fn new() -> Self {
        let mock = Arc::new(MockDevice::new());
        let memory = Arc::new(MockAllocator::new());
        Self {
            device: mock.clone(),
            allocator: memory.clone(),
            mock,
            memory,
        }
    }

    /// Begin recording into a throwaway command buffer
    pub(crate) fn begin_commands(&self) -> vk::CommandBuffer {
        let pool = self.device.create_command_pool().unwrap();
        let command_buffer = self.device.allocate_command_buffer(pool).unwrap();
        self.device.begin_command_buffer(command_buffer).unwrap();
        // Pool handle is only a counter for the mock
        self.device.destroy_command_pool(pool);
        command_buffer
    }
}

/// [`ShaderLibrary`] double with registered push-constant layouts
#[derive(Default, Clone)]
pub(crate) struct MockShaderLibrary {
    shaders: HashMap<String, Option<ReflectedType>>,
}

impl MockShaderLibrary {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register `name` with an opaque push-constant block of `size` bytes (none if 0)
    pub(crate) fn with_push_size(self, name: &str, size: usize) -> Self {
        let block = (size > 0).then(|| ReflectedType::Array {
            element: Box::new(ReflectedType::Scalar(ScalarKind::Int { bits: 32, signed: false })),
            count: Some(u32::try_from(size / 4).unwrap()),
            stride: Some(4),
        });
        self.with_push_type(name, block)
    }

    /// Register `name` with an explicit push-constant layout
    pub(crate) fn with_push_type(mut self, name: &str, block: Option<ReflectedType>) -> Self {
        self.shaders.insert(name.to_string(), block);
        self
    }
}

impl ShaderLibrary for MockShaderLibrary {
    fn load(&self, name: &str) -> VulkanResult<ShaderBinary> {
        match self.shaders.get(name) {
            Some(block) => Ok(ShaderBinary::new(name, vec![0x0723_0203, 0x0001_0600], block.clone())),
            None => Err(VulkanError::Io {
                path: format!("{name}.spv").into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not registered"),
            }),
        }
    }
}
