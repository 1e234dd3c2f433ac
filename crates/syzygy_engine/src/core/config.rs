//! # Unified Configuration System
//!
//! Configuration for the renderer, the engine loop and the window, loadable from TOML or RON
//! through the [`Config`] trait.
//!
//! ## Configuration Categories
//!
//! - **Renderer Config**: frames in flight, GPU wait timeouts, shadow pool, scene capacities
//! - **Engine Config**: logging and frame pacing
//! - **Window Config**: title and initial size

use ash::vk;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use crate::config::{Config, ConfigError};
use crate::render::backends::vulkan::resources::descriptor_set::PoolSizeRatio;

/// Swapchain presentation mode, falling back to FIFO when unsupported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PresentModePreference {
    /// Vsync, always available
    #[default]
    Fifo,
    /// Low-latency triple buffering
    Mailbox,
    /// No vsync
    Immediate,
}

impl PresentModePreference {
    /// Vulkan present mode
    pub fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            Self::Fifo => vk::PresentModeKHR::FIFO,
            Self::Mailbox => vk::PresentModeKHR::MAILBOX,
            Self::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

/// Element capacities of the per-frame scene buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneCapacities {
    /// Cameras
    pub cameras: u32,
    /// Atmosphere parameter sets
    pub atmospheres: u32,
    /// Directional lights
    pub directional_lights: u32,
    /// Spot lights
    pub spot_lights: u32,
    /// Mesh instances
    pub instances: u32,
    /// Debug line vertices (two per line)
    pub debug_line_vertices: u32,
}

impl Default for SceneCapacities {
    fn default() -> Self {
        Self {
            cameras: 8,
            atmospheres: 4,
            directional_lights: 8,
            spot_lights: 16,
            instances: 4096,
            debug_line_vertices: 16384,
        }
    }
}

/// # Renderer Configuration
///
/// Vulkan renderer settings: instance metadata, synchronization timeouts, resource pool
/// sizes and presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Per-frame fence wait before the device is considered lost, in milliseconds
    pub frame_fence_timeout_ms: u64,
    /// Immediate submission wait, in milliseconds
    pub immediate_timeout_ms: u64,
    /// Whether to enable Vulkan validation layers
    pub enable_validation: bool,
    /// Directory holding compiled `.spv` shaders
    pub shader_dir: PathBuf,
    /// Maximum number of shadow-casting lights per frame
    pub shadow_map_capacity: u32,
    /// Edge length of each shadow map in texels
    pub shadow_map_resolution: u32,
    /// Scene buffer capacities
    pub scene: SceneCapacities,
    /// Maximum sets of the global descriptor pool
    pub descriptor_max_sets: u32,
    /// Descriptors per set of each type in the global pool
    pub descriptor_ratios: Vec<PoolSizeRatio>,
    /// Preferred presentation mode
    pub present_mode: PresentModePreference,
}

impl RendererConfig {
    /// Defaults for `app_name`
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            frames_in_flight: 2,
            frame_fence_timeout_ms: 1_000,
            immediate_timeout_ms: 100_000,
            enable_validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("target/shaders"),
            shadow_map_capacity: 8,
            shadow_map_resolution: 2048,
            scene: SceneCapacities::default(),
            descriptor_max_sets: 64,
            descriptor_ratios: vec![
                PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 4.0),
                PoolSizeRatio::new(vk::DescriptorType::SAMPLED_IMAGE, 4.0),
                PoolSizeRatio::new(vk::DescriptorType::SAMPLER, 1.0),
                PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1.0),
                PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 2.0),
            ],
            present_mode: PresentModePreference::default(),
        }
    }

    /// Set frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = enabled;
        self
    }

    /// Set the compiled shader directory
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    /// Set shadow map pool capacity and resolution
    pub fn with_shadow_maps(mut self, capacity: u32, resolution: u32) -> Self {
        self.shadow_map_capacity = capacity;
        self.shadow_map_resolution = resolution;
        self
    }

    /// Set scene buffer capacities
    pub fn with_scene_capacities(mut self, scene: SceneCapacities) -> Self {
        self.scene = scene;
        self
    }

    /// Set the preferred present mode
    pub fn with_present_mode(mut self, mode: PresentModePreference) -> Self {
        self.present_mode = mode;
        self
    }

    /// Frame fence timeout in nanoseconds
    pub fn frame_fence_timeout_ns(&self) -> u64 {
        self.frame_fence_timeout_ms.saturating_mul(1_000_000)
    }

    /// Immediate submission timeout in nanoseconds
    pub fn immediate_timeout_ns(&self) -> u64 {
        self.immediate_timeout_ms.saturating_mul(1_000_000)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }
        if !(1..=8).contains(&self.frames_in_flight) {
            return Err(ConfigError::Invalid(format!(
                "Frames in flight must be between 1 and 8, got {}",
                self.frames_in_flight
            )));
        }
        if self.frame_fence_timeout_ms == 0 || self.immediate_timeout_ms == 0 {
            return Err(ConfigError::Invalid("GPU wait timeouts must be non-zero".to_string()));
        }
        if self.shadow_map_capacity == 0 || self.shadow_map_resolution == 0 {
            return Err(ConfigError::Invalid("Shadow map capacity and resolution must be non-zero".to_string()));
        }
        if self.scene.cameras == 0 || self.scene.atmospheres == 0 {
            return Err(ConfigError::Invalid("At least one camera and one atmosphere slot are required".to_string()));
        }
        if self.descriptor_max_sets == 0 || self.descriptor_ratios.is_empty() {
            return Err(ConfigError::Invalid("Descriptor pool must hold at least one set".to_string()));
        }
        if let Some(bad) = self.descriptor_ratios.iter().find(|r| !(r.ratio > 0.0)) {
            return Err(ConfigError::Invalid(format!(
                "Descriptor ratio for {:?} must be positive",
                bad.descriptor_type
            )));
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Syzygy")
    }
}

/// # Engine Configuration
///
/// Logging and main loop pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
    /// Whether to enable debug features
    pub debug_mode: bool,
    /// Target FPS for frame rate limiting
    pub target_fps: Option<u32>,
}

impl EngineConfig {
    /// Create a new engine configuration
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            debug_mode: cfg!(debug_assertions),
            target_fps: None,
        }
    }

    /// Set log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set target FPS
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Initial window settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Syzygy".to_string(),
            width: 1600,
            height: 900,
            resizable: true,
        }
    }
}

/// # Complete Application Configuration
///
/// Top-level configuration that encompasses all engine subsystems.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Engine core configuration
    pub engine: EngineConfig,
    /// Rendering system configuration
    pub renderer: RendererConfig,
    /// Window configuration
    pub window: WindowConfig,
}

impl ApplicationConfig {
    /// Create a new application configuration with defaults
    pub fn new(app_name: impl Into<String>) -> Self {
        let app_name = app_name.into();
        Self {
            engine: EngineConfig::default(),
            renderer: RendererConfig::new(app_name.clone()),
            window: WindowConfig {
                title: app_name,
                ..WindowConfig::default()
            },
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.renderer.validate()?;
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid("Window size must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Config for ApplicationConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ApplicationConfig::new("test");
        config.validate().unwrap();
        assert_eq!(config.renderer.frames_in_flight, 2);
        assert_eq!(config.renderer.frame_fence_timeout_ns(), 1_000_000_000);
        assert_eq!(config.renderer.immediate_timeout_ns(), 100_000_000_000);
    }

    #[test]
    fn test_frames_in_flight_range() {
        let zero = RendererConfig::default().with_frames_in_flight(0);
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid(_))));

        let many = RendererConfig::default().with_frames_in_flight(9);
        assert!(many.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        let mut config = ApplicationConfig::new("round trip");
        config.renderer = config
            .renderer
            .with_shadow_maps(4, 1024)
            .with_present_mode(PresentModePreference::Mailbox);
        config.engine = config.engine.with_target_fps(144);

        config.save_to_file(&path).unwrap();
        let loaded = ApplicationConfig::load_from_file(&path).unwrap();

        assert_eq!(loaded.renderer.shadow_map_capacity, 4);
        assert_eq!(loaded.renderer.present_mode, PresentModePreference::Mailbox);
        assert_eq!(loaded.renderer.descriptor_ratios, config.renderer.descriptor_ratios);
        assert_eq!(loaded.engine.target_fps, Some(144));
        assert_eq!(loaded.window.title, "round trip");
    }

    #[test]
    fn test_ron_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.ron");
        let config = ApplicationConfig::new("ron");

        config.save_to_file(&path).unwrap();
        let loaded = ApplicationConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.renderer.scene, config.renderer.scene);
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.json");
        let err = ApplicationConfig::default().save_to_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }
}
