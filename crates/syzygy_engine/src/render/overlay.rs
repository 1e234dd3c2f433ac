//! UI hook
//!
//! The renderer knows nothing about the UI library. Once per frame it hands the overlay the
//! statistics of the previous frame plus mutable tunables and scene, and later lets it record
//! into the swapchain image, which is in `COLOR_ATTACHMENT_OPTIMAL` at that point.

use ash::vk;

use super::scene::SceneState;
use super::stats::{DrawStatistics, RendererTunables};
use crate::render::backends::vulkan::{CommandRecorder, VulkanResult};

/// Swapchain image the overlay draws into
#[derive(Debug, Clone, Copy)]
pub struct OverlayTarget {
    /// Colour attachment view
    pub view: vk::ImageView,
    /// Size in pixels
    pub extent: vk::Extent2D,
    /// Attachment format
    pub format: vk::Format,
}

/// User interface drawn over the final image
pub trait UiOverlay {
    /// Build the interface for this frame, editing settings and scene in place
    fn build(&mut self, stats: &DrawStatistics, tunables: &mut RendererTunables, scene: &mut SceneState);

    /// Record draw commands for the interface
    fn record(&mut self, recorder: &mut CommandRecorder<'_>, target: &OverlayTarget) -> VulkanResult<()>;
}

/// Overlay that draws nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOverlay;

impl UiOverlay for NoOverlay {
    fn build(&mut self, _stats: &DrawStatistics, _tunables: &mut RendererTunables, _scene: &mut SceneState) {}

    fn record(&mut self, _recorder: &mut CommandRecorder<'_>, _target: &OverlayTarget) -> VulkanResult<()> {
        Ok(())
    }
}
