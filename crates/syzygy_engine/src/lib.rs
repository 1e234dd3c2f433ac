//! # Syzygy Engine
//!
//! A deferred Vulkan renderer with a frames-in-flight ring, staged GPU buffers and a pool of
//! shadow maps.
//!
//! ## Features
//!
//! - **Deferred Shading**: G-buffer pass followed by compute lighting
//! - **Shadow Maps**: one depth map per directional or spot light, grown on demand
//! - **Atmospheric Sky**: compute pass behind the lit scene
//! - **Compute Backgrounds**: swappable shaders with reflected push constants
//! - **Resize Handling**: swapchain and off-screen targets follow the window
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use syzygy_engine::prelude::*;
//!
//! struct MyApp;
//!
//! impl Application for MyApp {
//!     fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
//!         let (renderer, scene) = engine.renderer_and_scene_mut();
//!         let cube = renderer.upload_mesh(&MeshData::cube("cube"))?;
//!         renderer.select_mesh(scene, cube);
//!         Ok(())
//!     }
//!
//!     fn update(&mut self, engine: &mut Engine, delta_time: f32) -> Result<(), AppError> {
//!         engine.scene_mut().cameras_mut()[0].position.x += delta_time;
//!         Ok(())
//!     }
//!
//!     fn cleanup(&mut self, _engine: &mut Engine) {}
//! }
//!
//! fn run(window: &mut dyn WindowBackend) -> Result<(), EngineError> {
//!     let config = ApplicationConfig::new("My App");
//!     Engine::run(config, window, &mut MyApp)
//! }
//! ```

#![warn(missing_docs)]

// Core engine modules
pub mod config;
pub mod core;

pub mod foundation;
pub mod render;

mod application;
mod engine;

pub use application::{AppError, Application};
pub use engine::{Engine, EngineError};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        core::config::{ApplicationConfig, Config, EngineConfig, RendererConfig, WindowConfig},
        foundation::{
            math::{Mat4, Transform, Vec3},
            time::Timer,
        },
        render::backends::vulkan::{MeshData, WindowBackend, WindowEvent},
        render::{
            Atmosphere, Camera, DebugLine, DirectionalLight, DrawStatistics, FrameOutcome, Renderer,
            RendererFeatures, RendererTunables, SceneState, SpotLight, UiOverlay,
        },
        AppError, Application, Engine, EngineError,
    };
}
