//! Application trait and lifecycle management

use crate::engine::Engine;
use crate::render::backends::vulkan::{VulkanError, WindowEvent};
use thiserror::Error;

/// Application lifecycle trait
///
/// Implement this trait to drive a scene with the engine. The engine owns the renderer and the
/// scene; the application edits them between frames.
pub trait Application {
    /// Initialize the application
    ///
    /// Called once after the renderer exists. Upload meshes and build the initial scene here.
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError>;

    /// Update the application
    ///
    /// Called every frame before the frame is drawn.
    ///
    /// # Arguments
    /// * `engine` - Mutable reference to the engine
    /// * `delta_time` - Time since last frame in seconds
    fn update(&mut self, engine: &mut Engine, delta_time: f32) -> Result<(), AppError>;

    /// Handle a window event
    ///
    /// The engine has already reacted to resize, close and minimize when this is called.
    fn handle_event(&mut self, _engine: &mut Engine, _event: &WindowEvent) -> Result<(), AppError> {
        Ok(())
    }

    /// Cleanup the application
    ///
    /// Called once when the main loop ends, before the renderer is torn down.
    fn cleanup(&mut self, engine: &mut Engine);
}

/// Application-level errors
#[derive(Error, Debug)]
pub enum AppError {
    /// GPU error raised while the application used the renderer
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),

    /// Custom application error
    #[error("Application error: {0}")]
    Custom(String),

    /// Asset loading error
    #[error("Asset error: {0}")]
    Asset(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}
