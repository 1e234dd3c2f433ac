//! # Rendering System
//!
//! Deferred Vulkan renderer: shadow maps per light, a G-buffer pass, compute lighting, an
//! atmospheric sky and a debug line overlay, driven by a frames-in-flight ring.
//!
//! ## Architecture
//!
//! - **Backends**: GPU binding, resource owners, command recording and frame state
//! - **Pipelines**: one object per pass, each recording exactly the commands of that pass
//! - **Scene**: plain data the application edits, staged into per-frame GPU buffers
//! - **Renderer**: owns everything and composes the frame

/// Graphics backend implementations
///
/// Currently supports Vulkan only.
pub mod backends;

/// Off-screen targets sized to the swapchain
pub mod draw_targets;

/// UI overlay hook
pub mod overlay;

/// Pipeline objects of every pass
pub mod pipelines;

/// Frame driver
pub mod renderer;

/// Scene model and its GPU layouts
pub mod scene;

/// Per-frame GPU copies of the scene arrays
pub mod scene_buffers;

/// Shadow map pool
pub mod shadow;

/// Draw statistics and tunables
pub mod stats;

pub use draw_targets::DrawTargets;
pub use overlay::{NoOverlay, OverlayTarget, UiOverlay};
pub use renderer::{FrameOutcome, Renderer};
pub use scene::{Atmosphere, Camera, DebugLine, DirectionalLight, SceneState, SpotLight};
pub use scene_buffers::SceneGpuBuffers;
pub use shadow::{ShadowPassArray, ShadowPassDesc};
pub use stats::{DrawStatistics, RendererFeatures, RendererTunables};
