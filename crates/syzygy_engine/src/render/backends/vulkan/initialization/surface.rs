//! Window seam
//!
//! The renderer needs very little from the window system: the framebuffer size, a close flag,
//! resize notifications, the instance extensions for presentation and a surface. The
//! application shell implements [`WindowBackend`] for its windowing library.

use ash::vk;
use thiserror::Error;

/// Window system errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// Window system could not be initialized
    #[error("Window system initialization failed: {0}")]
    InitializationFailed(String),

    /// Window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Presentation surface could not be created
    #[error("Surface creation failed: {0:?}")]
    SurfaceCreation(vk::Result),

    /// The window system cannot report the instance extensions Vulkan needs
    #[error("Vulkan is not supported by the window system")]
    VulkanUnsupported,
}

/// Window events the engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// Framebuffer size changed
    Resized {
        /// New framebuffer width in pixels
        width: u32,
        /// New framebuffer height in pixels
        height: u32,
    },
    /// The user asked to close the window
    CloseRequested,
    /// Window lost or regained visibility
    Minimized(bool),
}

/// What the engine needs from a window
pub trait WindowBackend {
    /// Current framebuffer size in pixels
    fn framebuffer_extent(&self) -> vk::Extent2D;

    /// Whether the window should close
    fn should_close(&self) -> bool;

    /// Pump the event loop and return what happened since the last call
    fn poll_events(&mut self) -> Vec<WindowEvent>;

    /// Instance extensions required to present to this window
    fn required_instance_extensions(&self) -> Result<Vec<String>, WindowError>;

    /// Create a presentation surface for `instance`
    fn create_surface(&mut self, instance: vk::Instance) -> Result<vk::SurfaceKHR, WindowError>;
}
