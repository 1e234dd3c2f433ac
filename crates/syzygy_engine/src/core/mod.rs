//! # Core Engine Module
//!
//! Shared configuration for the engine, renderer and window.

pub mod config;

pub use config::{
    ApplicationConfig, Config, ConfigError, EngineConfig, PresentModePreference, RendererConfig, SceneCapacities,
    WindowConfig,
};
