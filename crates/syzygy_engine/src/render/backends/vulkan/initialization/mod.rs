// Vulkan initialization components

pub mod context;
pub mod surface;

pub use context::*;
pub use surface::*;
