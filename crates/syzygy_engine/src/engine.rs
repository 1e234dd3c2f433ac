//! Core engine implementation
//!
//! The engine brings up the Vulkan context for a window, owns the renderer and the scene, and
//! runs the main loop: poll events, update the application, then draw one frame.

use std::time::Duration;

use crate::application::{AppError, Application};
use crate::core::config::{ApplicationConfig, ConfigError, EngineConfig};
use crate::foundation::time::Timer;
use crate::render::backends::vulkan::{
    FileShaderLibrary, VulkanContext, VulkanError, WindowBackend, WindowError, WindowEvent,
};
use crate::render::{FrameOutcome, Renderer, SceneState};
use thiserror::Error;

/// How long to sleep between polls while the window is minimized
const MINIMIZED_POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Main engine struct
///
/// The engine coordinates the renderer, the scene and frame timing.
pub struct Engine {
    // Dropped before the context that owns the device
    renderer: Renderer,
    scene: SceneState,
    timer: Timer,
    config: EngineConfig,
    running: bool,
    minimized: bool,
    context: Option<VulkanContext>,
}

impl Engine {
    /// Run the engine main loop for `app` on `window`
    pub fn run<T: Application>(
        config: ApplicationConfig,
        window: &mut dyn WindowBackend,
        app: &mut T,
    ) -> Result<(), EngineError> {
        config.validate()?;
        log::info!("Initializing engine...");

        let renderer_config = &config.renderer;
        let context = VulkanContext::new(
            window,
            &renderer_config.application_name,
            renderer_config.enable_validation,
            renderer_config.present_mode.to_vk(),
        )?;
        log::info!("Using GPU: {}", context.device_name());

        let shaders = FileShaderLibrary::new(&renderer_config.shader_dir);
        let renderer = Renderer::new(
            &context.device(),
            &context.allocator(),
            &shaders,
            renderer_config,
            window.framebuffer_extent(),
        )?;

        let mut engine = Self::from_parts(renderer, config.engine, Some(context));
        engine.run_loop(window, app)
    }

    fn from_parts(renderer: Renderer, config: EngineConfig, context: Option<VulkanContext>) -> Self {
        Self {
            renderer,
            scene: SceneState::new(),
            timer: Timer::new(),
            config,
            running: true,
            minimized: false,
            context,
        }
    }

    fn run_loop<T: Application>(&mut self, window: &mut dyn WindowBackend, app: &mut T) -> Result<(), EngineError> {
        app.initialize(self)?;

        log::info!("Starting main loop...");
        let result = self.main_loop(window, app);

        app.cleanup(self);
        self.renderer.wait_idle()?;
        log::info!(
            "Engine shutdown complete after {} frames ({:.1} fps average)",
            self.timer.frame_count(),
            self.timer.average_fps()
        );
        result
    }

    fn main_loop<T: Application>(&mut self, window: &mut dyn WindowBackend, app: &mut T) -> Result<(), EngineError> {
        while self.running && !window.should_close() {
            for event in window.poll_events() {
                self.handle_event(&event);
                app.handle_event(self, &event)?;
            }
            if !self.running {
                break;
            }

            self.timer.update();
            let delta_time = self.timer.delta_time();
            app.update(self, delta_time)?;

            if self.minimized {
                std::thread::sleep(MINIMIZED_POLL_INTERVAL);
                continue;
            }

            if self.renderer.resize_pending() && !self.renderer.resize(window.framebuffer_extent())? {
                // Zero-sized framebuffer; retry once the window has an area again
                continue;
            }

            if self.renderer.draw_frame(&mut self.scene)? == FrameOutcome::Skipped {
                log::debug!("Frame skipped, swapchain out of date");
            }

            if let Some(remaining) = self.config.target_fps.and_then(|fps| self.timer.frame_budget_remaining(fps)) {
                std::thread::sleep(remaining);
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: &WindowEvent) {
        match *event {
            WindowEvent::Resized { width, height } => {
                log::debug!("Window resized to {width}x{height}");
                self.renderer.request_resize();
            }
            WindowEvent::CloseRequested => {
                self.running = false;
            }
            WindowEvent::Minimized(minimized) => {
                self.minimized = minimized;
                if !minimized {
                    self.renderer.request_resize();
                }
            }
        }
    }

    /// Request engine shutdown after the current frame
    pub fn quit(&mut self) {
        log::info!("Engine shutdown requested");
        self.running = false;
    }

    /// Whether the main loop keeps going
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Get the renderer
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Get mutable access to the renderer
    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    /// Get the scene
    pub fn scene(&self) -> &SceneState {
        &self.scene
    }

    /// Get mutable access to the scene
    pub fn scene_mut(&mut self) -> &mut SceneState {
        &mut self.scene
    }

    /// Renderer and scene together, for code that uploads meshes and selects them
    pub fn renderer_and_scene_mut(&mut self) -> (&mut Renderer, &mut SceneState) {
        (&mut self.renderer, &mut self.scene)
    }

    /// Get the current frame delta time
    pub fn delta_time(&self) -> f32 {
        self.timer.delta_time()
    }

    /// Frame timing
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Name of the GPU the engine runs on
    pub fn device_name(&self) -> Option<String> {
        self.context.as_ref().map(VulkanContext::device_name)
    }
}

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration rejected before start-up
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Window system failure
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// GPU failure
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),

    /// Application returned an error
    #[error("Application error: {0}")]
    Application(#[from] AppError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RendererConfig;
    use crate::render::backends::vulkan::testing::{Event, MockGpu};
    use crate::render::backends::vulkan::{MeshData, PresentOutcome};
    use crate::render::pipelines::test_support::shader_library;
    use ash::vk;
    use std::collections::VecDeque;

    struct ScriptedWindow {
        extent: vk::Extent2D,
        frames: VecDeque<Vec<WindowEvent>>,
    }

    impl ScriptedWindow {
        fn new(frames: Vec<Vec<WindowEvent>>) -> Self {
            Self {
                extent: vk::Extent2D { width: 320, height: 240 },
                frames: frames.into(),
            }
        }
    }

    impl WindowBackend for ScriptedWindow {
        fn framebuffer_extent(&self) -> vk::Extent2D {
            self.extent
        }

        fn should_close(&self) -> bool {
            false
        }

        fn poll_events(&mut self) -> Vec<WindowEvent> {
            let events = self.frames.pop_front().unwrap_or_default();
            for event in &events {
                if let WindowEvent::Resized { width, height } = *event {
                    self.extent = vk::Extent2D { width, height };
                }
            }
            events
        }

        fn required_instance_extensions(&self) -> Result<Vec<String>, WindowError> {
            Ok(Vec::new())
        }

        fn create_surface(&mut self, _instance: vk::Instance) -> Result<vk::SurfaceKHR, WindowError> {
            Err(WindowError::CreationFailed)
        }
    }

    #[derive(Default)]
    struct CountingApp {
        quit_after: u32,
        updates: u32,
        events: Vec<WindowEvent>,
        cleaned_up: bool,
        fail_on_update: bool,
    }

    impl Application for CountingApp {
        fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
            let (renderer, scene) = engine.renderer_and_scene_mut();
            let index = renderer.upload_mesh(&MeshData::cube("cube"))?;
            renderer.select_mesh(scene, index);
            Ok(())
        }

        fn update(&mut self, engine: &mut Engine, _delta_time: f32) -> Result<(), AppError> {
            if self.fail_on_update {
                return Err(AppError::Custom("scripted failure".to_string()));
            }
            self.updates += 1;
            if self.updates >= self.quit_after {
                engine.quit();
            }
            Ok(())
        }

        fn handle_event(&mut self, _engine: &mut Engine, event: &WindowEvent) -> Result<(), AppError> {
            self.events.push(*event);
            Ok(())
        }

        fn cleanup(&mut self, _engine: &mut Engine) {
            self.cleaned_up = true;
        }
    }

    fn engine(gpu: &MockGpu) -> Engine {
        let config = RendererConfig::new("engine-test").with_shadow_maps(2, 64);
        let renderer = Renderer::new(
            &gpu.device,
            &gpu.allocator,
            &shader_library(),
            &config,
            vk::Extent2D { width: 320, height: 240 },
        )
        .unwrap();
        Engine::from_parts(renderer, EngineConfig::new(), None)
    }

    fn presents(gpu: &MockGpu) -> usize {
        gpu.mock
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Present { .. }))
            .count()
    }

    #[test]
    fn test_loop_draws_until_quit() {
        let gpu = MockGpu::new();
        let mut engine = engine(&gpu);
        let mut window = ScriptedWindow::new(Vec::new());
        let mut app = CountingApp { quit_after: 3, ..Default::default() };

        engine.run_loop(&mut window, &mut app).unwrap();

        // The update that quits still draws its frame
        assert_eq!(app.updates, 3);
        assert_eq!(presents(&gpu), 3);
        assert!(app.cleaned_up);
        assert!(!engine.is_running());
        assert_eq!(engine.timer().frame_count(), 3);
        assert_eq!(engine.device_name(), None);
    }

    #[test]
    fn test_close_request_stops_before_update() {
        let gpu = MockGpu::new();
        let mut engine = engine(&gpu);
        let mut window = ScriptedWindow::new(vec![Vec::new(), vec![WindowEvent::CloseRequested]]);
        let mut app = CountingApp { quit_after: 10, ..Default::default() };

        engine.run_loop(&mut window, &mut app).unwrap();

        assert_eq!(app.updates, 1);
        assert_eq!(app.events, vec![WindowEvent::CloseRequested]);
        assert!(app.cleaned_up);
    }

    #[test]
    fn test_resize_event_recreates_swapchain_at_window_size() {
        let gpu = MockGpu::new();
        let mut engine = engine(&gpu);
        let resized = WindowEvent::Resized { width: 640, height: 480 };
        let mut window = ScriptedWindow::new(vec![Vec::new(), vec![resized]]);
        let mut app = CountingApp { quit_after: 3, ..Default::default() };

        engine.run_loop(&mut window, &mut app).unwrap();

        let extent = vk::Extent2D { width: 640, height: 480 };
        assert!(gpu.mock.events().contains(&Event::CreateSwapchain(extent)));
        assert_eq!(engine.renderer().extent(), extent);
        assert_eq!(presents(&gpu), 3);
    }

    #[test]
    fn test_stale_present_resizes_on_next_frame() {
        let gpu = MockGpu::new();
        let mut engine = engine(&gpu);
        gpu.mock.script_present(PresentOutcome::OutOfDate);
        let mut window = ScriptedWindow::new(Vec::new());
        let mut app = CountingApp { quit_after: 2, ..Default::default() };

        engine.run_loop(&mut window, &mut app).unwrap();

        let recreated = gpu
            .mock
            .events()
            .iter()
            .filter(|e| matches!(e, Event::CreateSwapchain(_)))
            .count();
        assert_eq!(recreated, 2);
        assert!(!engine.renderer().resize_pending());
    }

    #[test]
    fn test_minimized_window_skips_drawing() {
        let gpu = MockGpu::new();
        let mut engine = engine(&gpu);
        let mut window = ScriptedWindow::new(vec![vec![WindowEvent::Minimized(true)], Vec::new()]);
        let mut app = CountingApp { quit_after: 2, ..Default::default() };

        engine.run_loop(&mut window, &mut app).unwrap();

        assert_eq!(app.updates, 2);
        assert_eq!(presents(&gpu), 0);
    }

    #[test]
    fn test_application_error_ends_loop_after_cleanup() {
        let gpu = MockGpu::new();
        let mut engine = engine(&gpu);
        let mut window = ScriptedWindow::new(Vec::new());
        let mut app = CountingApp { fail_on_update: true, ..Default::default() };

        let result = engine.run_loop(&mut window, &mut app);

        assert!(matches!(result, Err(EngineError::Application(AppError::Custom(_)))));
        assert!(app.cleaned_up);
        drop(engine);
        assert!(gpu.mock.leaked_kinds().is_empty(), "{:?}", gpu.mock.leaked_kinds());
    }
}
