//! Descriptor set layouts, pools and writes
//!
//! Layouts are built declaratively with [`DescriptorLayoutBuilder`]. A [`DescriptorAllocator`]
//! owns one pool sized from `(type, ratio)` pairs; sets are never freed individually, the whole
//! pool is reset at once with [`DescriptorAllocator::clear_descriptors`].

use ash::vk;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::render::backends::vulkan::device::{DescriptorWrite, GpuDevice, LayoutBinding};
use crate::render::backends::vulkan::error::VulkanResult;

/// Accumulates bindings for one descriptor set layout
#[derive(Debug, Default, Clone)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<LayoutBinding>,
}

impl DescriptorLayoutBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single-descriptor binding
    pub fn add_binding(self, binding: u32, descriptor_type: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        self.add_binding_with(LayoutBinding {
            binding,
            descriptor_type,
            count: 1,
            stage_flags: stages,
            ..Default::default()
        })
    }

    /// Add a fully specified binding (arrays, binding flags, immutable samplers)
    pub fn add_binding_with(mut self, binding: LayoutBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Bindings added so far
    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    /// Forget all bindings
    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Create the layout
    pub fn build(
        &self,
        device: &Arc<dyn GpuDevice>,
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> VulkanResult<DescriptorSetLayout> {
        let layout = device.create_descriptor_set_layout(&self.bindings, flags)?;
        let variable_binding = self
            .bindings
            .iter()
            .any(|b| b.binding_flags.contains(vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT));

        log::debug!("Created descriptor set layout with {} bindings", self.bindings.len());
        Ok(DescriptorSetLayout {
            device: Arc::clone(device),
            layout,
            variable_binding,
        })
    }
}

/// Descriptor set layout with automatic cleanup
pub struct DescriptorSetLayout {
    device: Arc<dyn GpuDevice>,
    layout: vk::DescriptorSetLayout,
    variable_binding: bool,
}

impl DescriptorSetLayout {
    /// Layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Whether the last binding has a variable descriptor count
    pub fn has_variable_binding(&self) -> bool {
        self.variable_binding
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.device.destroy_descriptor_set_layout(self.layout);
    }
}

/// Descriptors of one type per set in a pool
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolSizeRatio {
    /// Descriptor type
    #[serde(with = "descriptor_type_serde")]
    pub descriptor_type: vk::DescriptorType,
    /// Descriptors of this type per set
    pub ratio: f32,
}

impl PoolSizeRatio {
    /// Create a ratio entry
    pub const fn new(descriptor_type: vk::DescriptorType, ratio: f32) -> Self {
        Self { descriptor_type, ratio }
    }
}

mod descriptor_type_serde {
    use ash::vk;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &vk::DescriptorType, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(value.as_raw())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<vk::DescriptorType, D::Error> {
        i32::deserialize(deserializer).map(vk::DescriptorType::from_raw)
    }
}

/// One descriptor pool with bulk reset
pub struct DescriptorAllocator {
    device: Arc<dyn GpuDevice>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorAllocator {
    /// Create a pool for `max_sets` sets, each type sized `ratio * max_sets`
    pub fn create(
        device: &Arc<dyn GpuDevice>,
        max_sets: u32,
        ratios: &[PoolSizeRatio],
        flags: vk::DescriptorPoolCreateFlags,
    ) -> VulkanResult<Self> {
        let sizes = pool_sizes(max_sets, ratios);
        let pool = device.create_descriptor_pool(max_sets, &sizes, flags)?;

        log::debug!("Created descriptor pool for {max_sets} sets ({} types)", sizes.len());
        Ok(Self {
            device: Arc::clone(device),
            pool,
            max_sets,
        })
    }

    /// Pool handle
    pub fn pool(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Maximum number of live sets
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Allocate one set
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        self.device.allocate_descriptor_set(self.pool, layout.handle(), None)
    }

    /// Allocate one set whose variable-count binding holds `count` descriptors
    pub fn allocate_variable(&self, layout: &DescriptorSetLayout, count: u32) -> VulkanResult<vk::DescriptorSet> {
        let variable = layout.has_variable_binding().then_some(count);
        self.device
            .allocate_descriptor_set(self.pool, layout.handle(), variable)
    }

    /// Return every set to the pool; previously allocated handles become invalid
    pub fn clear_descriptors(&mut self) -> VulkanResult<()> {
        self.device.reset_descriptor_pool(self.pool)
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        self.device.destroy_descriptor_pool(self.pool);
    }
}

fn pool_sizes(max_sets: u32, ratios: &[PoolSizeRatio]) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|ratio| vk::DescriptorPoolSize {
            ty: ratio.descriptor_type,
            descriptor_count: ((ratio.ratio * max_sets as f32).ceil() as u32).max(1),
        })
        .collect()
}

/// Batches descriptor writes and applies them in one update
#[derive(Debug, Default)]
pub struct DescriptorWriter {
    writes: Vec<DescriptorWrite>,
}

impl DescriptorWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one image descriptor
    pub fn write_image(
        &mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        descriptor_type: vk::DescriptorType,
    ) -> &mut Self {
        self.write_images(binding, 0, descriptor_type, vec![image_info(view, sampler, layout)])
    }

    /// Queue consecutive image descriptors starting at `array_element`
    pub fn write_images(
        &mut self,
        binding: u32,
        array_element: u32,
        descriptor_type: vk::DescriptorType,
        images: Vec<vk::DescriptorImageInfo>,
    ) -> &mut Self {
        if !images.is_empty() {
            self.writes.push(DescriptorWrite {
                binding,
                array_element,
                descriptor_type,
                images,
                ..Default::default()
            });
        }
        self
    }

    /// Queue one buffer descriptor
    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        descriptor_type: vk::DescriptorType,
    ) -> &mut Self {
        self.writes.push(DescriptorWrite {
            binding,
            descriptor_type,
            buffers: vec![vk::DescriptorBufferInfo { buffer, offset, range: size }],
            ..Default::default()
        });
        self
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Drop queued writes
    pub fn clear(&mut self) {
        self.writes.clear();
    }

    /// Apply all queued writes to `set` and clear the queue
    pub fn update_set(&mut self, device: &dyn GpuDevice, set: vk::DescriptorSet) {
        if self.writes.is_empty() {
            return;
        }
        for write in &mut self.writes {
            write.set = set;
        }
        device.update_descriptor_sets(&self.writes);
        self.writes.clear();
    }
}

/// Image descriptor info
pub fn image_info(view: vk::ImageView, sampler: vk::Sampler, layout: vk::ImageLayout) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo {
        sampler,
        image_view: view,
        image_layout: layout,
    }
}
