//! Backend implementations for the render module
//!
//! Currently only Vulkan is supported.

pub mod vulkan;
