//! Vulkan backend implementation
//!
//! Organized into initialization, resources, rendering and state modules. Everything above
//! `initialization` talks to the GPU through the [`GpuDevice`] and [`MemoryAllocator`] traits.

/// Graphics binding trait and its parameter types
pub mod device;

/// Error types
pub mod error;

/// Vulkan initialization types (instance, device selection, window seam)
pub mod initialization;

/// Vulkan resource management (buffers, images, descriptors, meshes)
pub mod resources;

/// Vulkan rendering operations (command recording, shaders, pipelines)
pub mod rendering;

/// Vulkan state management (synchronization, frame ring, swapchain)
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use device::{AcquireOutcome, GpuDevice, PresentOutcome};
pub use error::{VkResultExt, VulkanError, VulkanResult};

pub use initialization::context::{AshDevice, PhysicalDeviceInfo, VulkanContext};
pub use initialization::surface::{WindowBackend, WindowError, WindowEvent};

pub use resources::allocator::{MemoryAllocator, MemoryPolicy, VmaAllocator};
pub use resources::buffer::AllocatedBuffer;
pub use resources::descriptor_set::{DescriptorAllocator, DescriptorLayoutBuilder, DescriptorSetLayout, DescriptorWriter, PoolSizeRatio};
pub use resources::image::{AllocatedImage, ImageDesc, ImageStorage, Sampler};
pub use resources::mesh::{GeometrySurface, GpuMeshBuffers, MeshData, Vertex};
pub use resources::staged_buffer::{StagedBuffer, TypedStagedBuffer};

pub use rendering::commands::{CommandRecorder, DrawCounters};
pub use rendering::pipeline_builder::{GraphicsPipelineBuilder, Pipeline, PipelineLayout};
pub use rendering::reflection::{ReflectedField, ReflectedType, ScalarKind};
pub use rendering::shader::{FileShaderLibrary, ShaderBinary, ShaderLibrary, ShaderModule};

pub use state::frame::{FrameData, FrameRing, FrameSlotState};
pub use state::immediate::ImmediateSubmitter;
pub use state::swapchain::Swapchain;
pub use state::sync::{Fence, Semaphore};
