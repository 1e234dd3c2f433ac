//! Vulkan resource management
//!
//! GPU memory, buffers (plain and staged), images, descriptor pools/layouts and mesh buffers.

/// Memory allocator seam and VMA implementation
pub mod allocator;

/// Owned buffer allocations
pub mod buffer;

/// Host staging paired with device-local buffers
pub mod staged_buffer;

/// Descriptor layouts, pools and writes
pub mod descriptor_set;

/// Images with tracked layouts
pub mod image;

/// Mesh upload
pub mod mesh;
