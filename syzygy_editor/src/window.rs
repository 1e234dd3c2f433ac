//! Window management using GLFW

use ash::vk;
use syzygy_engine::core::WindowConfig;
use syzygy_engine::render::backends::vulkan::{WindowBackend, WindowError, WindowEvent};

/// GLFW window without a client API, for Vulkan presentation
pub struct GlfwWindow {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl GlfwWindow {
    /// Open a window as described by `config`
    pub fn new(config: &WindowConfig) -> Result<Self, WindowError> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|e| WindowError::InitializationFailed(format!("{e:?}")))?;

        // Configure for Vulkan (no OpenGL context)
        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(config.resizable));

        let (mut window, events) = glfw
            .create_window(config.width, config.height, &config.title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);
        window.set_iconify_polling(true);

        Ok(Self { glfw, window, events })
    }
}

impl WindowBackend for GlfwWindow {
    fn framebuffer_extent(&self) -> vk::Extent2D {
        let (width, height) = self.window.get_framebuffer_size();
        vk::Extent2D {
            width: u32::try_from(width).unwrap_or(0),
            height: u32::try_from(height).unwrap_or(0),
        }
    }

    fn should_close(&self) -> bool {
        self.window.should_close()
    }

    fn poll_events(&mut self) -> Vec<WindowEvent> {
        self.glfw.poll_events();
        let mut events = Vec::new();
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                glfw::WindowEvent::FramebufferSize(width, height) => events.push(WindowEvent::Resized {
                    width: u32::try_from(width).unwrap_or(0),
                    height: u32::try_from(height).unwrap_or(0),
                }),
                glfw::WindowEvent::Close => events.push(WindowEvent::CloseRequested),
                glfw::WindowEvent::Iconify(iconified) => events.push(WindowEvent::Minimized(iconified)),
                glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => {
                    self.window.set_should_close(true);
                    events.push(WindowEvent::CloseRequested);
                }
                _ => {}
            }
        }
        events
    }

    fn required_instance_extensions(&self) -> Result<Vec<String>, WindowError> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or(WindowError::VulkanUnsupported)
    }

    fn create_surface(&mut self, instance: vk::Instance) -> Result<vk::SurfaceKHR, WindowError> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);
        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::SurfaceCreation(result))
        }
    }
}
