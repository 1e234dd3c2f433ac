// Vulkan rendering components

pub mod commands;
pub mod pipeline_builder;
pub mod reflection;
pub mod shader;

pub use commands::*;
pub use pipeline_builder::*;
pub use reflection::*;
pub use shader::*;
