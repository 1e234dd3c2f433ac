//! Vulkan context management
//!
//! Instance and debug messenger creation, physical device selection, logical device creation
//! and [`AshDevice`], the production implementation of [`GpuDevice`]. The renderer requires
//! Vulkan 1.3 with dynamic rendering, synchronization2, buffer device address and descriptor
//! indexing (partially bound, variable count, runtime arrays).

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::surface::WindowBackend;
use crate::render::backends::vulkan::device::{
    AcquireOutcome, BlendMode, DescriptorWrite, GpuDevice, GraphicsPipelineDesc, ImageViewDesc, LayoutBinding,
    PresentOutcome, QueueSubmission, RenderingAttachments, SwapchainImages,
};
use crate::render::backends::vulkan::error::{VkResultExt, VulkanError, VulkanResult};
use crate::render::backends::vulkan::resources::allocator::{MemoryAllocator, VmaAllocator};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"Syzygy";

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a Vulkan 1.3 instance with the window's presentation extensions
    ///
    /// Validation is silently downgraded to off (with a warning) when the Khronos layer is
    /// not installed.
    pub fn new(window: &dyn WindowBackend, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e:?}")))?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| VulkanError::InitializationFailed(format!("Invalid application name {app_name:?}")))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let required_extensions = window
            .required_instance_extensions()
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to get required extensions: {e}")))?;
        let cstr_extensions = required_extensions
            .iter()
            .map(|ext| CString::new(ext.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid extension name: {e}")))?;
        let mut extensions: Vec<*const std::os::raw::c_char> = cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();

        let validation = enable_validation && Self::validation_layer_available(&entry)?;
        if enable_validation && !validation {
            log::warn!("Validation requested but {VALIDATION_LAYER:?} is not installed");
        }
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }
        let layer_names: Vec<*const std::os::raw::c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let enabled_features = [vk::ValidationFeatureEnableEXT::SYNCHRONIZATION_VALIDATION];
        let mut validation_features = vk::ValidationFeaturesEXT::builder().enabled_validation_features(&enabled_features);
        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);
        if validation {
            create_info = create_info.push_next(&mut validation_features);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }.context("vkCreateInstance")?;

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::info!("Created Vulkan 1.3 instance (validation {})", if validation { "on" } else { "off" });
        Ok(Self { entry, instance, debug })
    }

    fn validation_layer_available(entry: &Entry) -> VulkanResult<bool> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("vkEnumerateInstanceLayerProperties")?;
        Ok(layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER))
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.context("vkCreateDebugUtilsMessengerEXT")
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Routes validation messages into `log`
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::debug!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Pick the first suitable GPU, preferring discrete ones
    pub fn select_suitable_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }.context("vkEnumeratePhysicalDevices")?;

        let mut candidates = Vec::new();
        for device in devices {
            match Self::evaluate_device(instance, device, surface, surface_loader)? {
                Ok(info) => candidates.push(info),
                Err(reason) => log::debug!("Skipping GPU {}: {reason}", Self::name_of(instance, device)),
            }
        }
        candidates.sort_by_key(|info| info.properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU);

        let selected = candidates
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("No GPU supports Vulkan 1.3 with the required features".to_string()))?;
        log::info!("Selected GPU: {}", selected.name());
        Ok(selected)
    }

    /// Device name as reported by the driver
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    fn name_of(instance: &Instance, device: vk::PhysicalDevice) -> String {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    // Outer error is an API failure, inner error the reason the device is unsuitable
    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Result<Self, &'static str>> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        if properties.api_version < vk::API_VERSION_1_3 {
            return Ok(Err("Vulkan 1.3 not supported"));
        }

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let mut graphics_family = None;
        let mut present_family = None;
        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
                && graphics_family.is_none()
            {
                graphics_family = Some(index);
            }
            let present_support = unsafe { surface_loader.get_physical_device_surface_support(device, index, surface) }
                .context("vkGetPhysicalDeviceSurfaceSupportKHR")?;
            if present_support && present_family.is_none() {
                present_family = Some(index);
            }
        }
        let (Some(graphics_family), Some(present_family)) = (graphics_family, present_family) else {
            return Ok(Err("no graphics or present queue family"));
        };

        let extensions =
            unsafe { instance.enumerate_device_extension_properties(device) }.context("vkEnumerateDeviceExtensionProperties")?;
        let has_swapchain = extensions
            .iter()
            .any(|available| unsafe { CStr::from_ptr(available.extension_name.as_ptr()) } == SwapchainLoader::name());
        if !has_swapchain {
            return Ok(Err("VK_KHR_swapchain not supported"));
        }

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut features12)
            .push_next(&mut features13)
            .build();
        unsafe { instance.get_physical_device_features2(device, &mut features2) };
        let base = features2.features;

        let required = [
            (features13.dynamic_rendering, "dynamic rendering"),
            (features13.synchronization2, "synchronization2"),
            (features12.buffer_device_address, "buffer device address"),
            (features12.descriptor_indexing, "descriptor indexing"),
            (features12.descriptor_binding_partially_bound, "partially bound descriptors"),
            (features12.descriptor_binding_variable_descriptor_count, "variable descriptor count"),
            (features12.runtime_descriptor_array, "runtime descriptor arrays"),
            (base.shader_int64, "64-bit shader integers"),
        ];
        if let Some((_, missing)) = required.iter().find(|(supported, _)| *supported != vk::TRUE) {
            return Ok(Err(*missing));
        }

        Ok(Ok(Self {
            device,
            properties,
            graphics_family,
            present_family,
        }))
    }
}

/// Logical device wrapper
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics and compute queue
    pub graphics_queue: vk::Queue,
    /// Presentation queue
    pub present_queue: vk::Queue,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create the logical device with the renderer's required features enabled
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let unique_families: HashSet<u32> = [physical.graphics_family, physical.present_family].into_iter().collect();
        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::builder().shader_int64(true).fill_mode_non_solid(true);
        let mut features12 = vk::PhysicalDeviceVulkan12Features::builder()
            .buffer_device_address(true)
            .descriptor_indexing(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_variable_descriptor_count(true)
            .runtime_descriptor_array(true)
            .shader_sampled_image_array_non_uniform_indexing(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder()
            .dynamic_rendering(true)
            .synchronization2(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&features)
            .push_next(&mut features12)
            .push_next(&mut features13);

        let device = unsafe { instance.create_device(physical.device, &create_info, None) }.context("vkCreateDevice")?;
        let graphics_queue = unsafe { device.get_device_queue(physical.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical.present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }
}

/// [`GpuDevice`] implemented with `ash`
///
/// Owns the logical device, the surface and the instance; everything is destroyed when the
/// last `Arc` goes away, after every object created through it has been dropped.
pub struct AshDevice {
    logical: LogicalDevice,
    surface_loader: Surface,
    surface: vk::SurfaceKHR,
    physical: PhysicalDeviceInfo,
    preferred_present_mode: vk::PresentModeKHR,
    instance: VulkanInstance,
}

impl AshDevice {
    /// Raw `ash` device
    pub fn raw(&self) -> &Device {
        &self.logical.device
    }

    /// Raw `ash` instance
    pub fn raw_instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Selected physical device
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    fn surface_format(&self) -> VulkanResult<vk::SurfaceFormatKHR> {
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical.device, self.surface)
        }
        .context("vkGetPhysicalDeviceSurfaceFormatsKHR")?;

        formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| formats.first())
            .copied()
            .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))
    }

    fn present_mode(&self) -> VulkanResult<vk::PresentModeKHR> {
        let modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical.device, self.surface)
        }
        .context("vkGetPhysicalDeviceSurfacePresentModesKHR")?;
        if modes.contains(&self.preferred_present_mode) {
            Ok(self.preferred_present_mode)
        } else {
            log::warn!("Present mode {:?} unsupported, using FIFO", self.preferred_present_mode);
            Ok(vk::PresentModeKHR::FIFO)
        }
    }
}

impl Drop for AshDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.logical.device.device_wait_idle() {
                log::error!("vkDeviceWaitIdle failed during shutdown: {e:?}");
            }
            self.logical.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
        log::debug!("Destroyed logical device and surface");
    }
}

fn blend_attachment(mode: BlendMode) -> vk::PipelineColorBlendAttachmentState {
    let builder = vk::PipelineColorBlendAttachmentState::builder().color_write_mask(vk::ColorComponentFlags::RGBA);
    match mode {
        BlendMode::Disabled => builder.blend_enable(false),
        BlendMode::Alpha => builder
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD),
        BlendMode::Additive => builder
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD),
    }
    .build()
}

fn rendering_attachment(info: &crate::render::backends::vulkan::device::AttachmentInfo) -> vk::RenderingAttachmentInfo {
    vk::RenderingAttachmentInfo::builder()
        .image_view(info.view)
        .image_layout(info.layout)
        .load_op(info.load_op)
        .store_op(info.store_op)
        .clear_value(info.clear)
        .build()
}

impl GpuDevice for AshDevice {
    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.logical.device.create_fence(&info, None) }.context("vkCreateFence")
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.logical.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<()> {
        match unsafe { self.logical.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(VulkanError::FenceTimeout {
                what: "GPU fence",
                timeout_ns,
            }),
            Err(result) => Err(VulkanError::call("vkWaitForFences", result)),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        unsafe { self.logical.device.reset_fences(&[fence]) }.context("vkResetFences")
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        unsafe { self.logical.device.create_semaphore(&info, None) }.context("vkCreateSemaphore")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.logical.device.destroy_semaphore(semaphore, None) };
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.logical.device.device_wait_idle() }.context("vkDeviceWaitIdle")
    }

    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(self.physical.graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        unsafe { self.logical.device.create_command_pool(&info, None) }.context("vkCreateCommandPool")
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.logical.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.logical.device.allocate_command_buffers(&info) }.context("vkAllocateCommandBuffers")?;
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::call("vkAllocateCommandBuffers", vk::Result::ERROR_UNKNOWN))
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe {
            self.logical
                .device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }
        .context("vkResetCommandBuffer")
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.logical.device.begin_command_buffer(command_buffer, &info) }.context("vkBeginCommandBuffer")
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe { self.logical.device.end_command_buffer(command_buffer) }.context("vkEndCommandBuffer")
    }

    fn queue_submit(&self, submission: &QueueSubmission) -> VulkanResult<()> {
        let semaphore_info = |(semaphore, stage): (vk::Semaphore, vk::PipelineStageFlags2)| {
            vk::SemaphoreSubmitInfo::builder()
                .semaphore(semaphore)
                .stage_mask(stage)
                .value(1)
                .build()
        };
        let waits: Vec<_> = submission.wait.into_iter().map(semaphore_info).collect();
        let signals: Vec<_> = submission.signal.into_iter().map(semaphore_info).collect();
        let command_buffers = [vk::CommandBufferSubmitInfo::builder()
            .command_buffer(submission.command_buffer)
            .build()];

        let submit = vk::SubmitInfo2::builder()
            .wait_semaphore_infos(&waits)
            .signal_semaphore_infos(&signals)
            .command_buffer_infos(&command_buffers)
            .build();
        unsafe {
            self.logical
                .device
                .queue_submit2(self.logical.graphics_queue, &[submit], submission.fence)
        }
        .context("vkQueueSubmit2")
    }

    fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::builder().buffer(buffer);
        unsafe { self.logical.device.get_buffer_device_address(&info) }
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(desc.image)
            .view_type(desc.view_type)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { self.logical.device.create_image_view(&info, None) }.context("vkCreateImageView")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.logical.device.destroy_image_view(view, None) };
    }

    fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> VulkanResult<vk::Sampler> {
        unsafe { self.logical.device.create_sampler(info, None) }.context("vkCreateSampler")
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.logical.device.destroy_sampler(sampler, None) };
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let raw: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| vk::DescriptorSetLayoutBinding {
                binding: b.binding,
                descriptor_type: b.descriptor_type,
                descriptor_count: b.count,
                stage_flags: b.stage_flags,
                p_immutable_samplers: if b.immutable_samplers.is_empty() {
                    std::ptr::null()
                } else {
                    b.immutable_samplers.as_ptr()
                },
            })
            .collect();
        let binding_flags: Vec<vk::DescriptorBindingFlags> = bindings.iter().map(|b| b.binding_flags).collect();
        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder().binding_flags(&binding_flags);

        let mut info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&raw).flags(flags);
        if binding_flags.iter().any(|f| !f.is_empty()) {
            info = info.push_next(&mut flags_info);
        }
        unsafe { self.logical.device.create_descriptor_set_layout(&info, None) }.context("vkCreateDescriptorSetLayout")
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.logical.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
        flags: vk::DescriptorPoolCreateFlags,
    ) -> VulkanResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(sizes)
            .flags(flags);
        unsafe { self.logical.device.create_descriptor_pool(&info, None) }.context("vkCreateDescriptorPool")
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.logical.device.destroy_descriptor_pool(pool, None) };
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()> {
        unsafe {
            self.logical
                .device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        }
        .context("vkResetDescriptorPool")
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        variable_count: Option<u32>,
    ) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout];
        let counts = [variable_count.unwrap_or(0)];
        let mut variable_info = vk::DescriptorSetVariableDescriptorCountAllocateInfo::builder().descriptor_counts(&counts);
        let mut info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        if variable_count.is_some() {
            info = info.push_next(&mut variable_info);
        }

        let sets = unsafe { self.logical.device.allocate_descriptor_sets(&info) }.context("vkAllocateDescriptorSets")?;
        sets.into_iter()
            .next()
            .ok_or_else(|| VulkanError::call("vkAllocateDescriptorSets", vk::Result::ERROR_UNKNOWN))
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let raw: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .filter(|w| !w.images.is_empty() || !w.buffers.is_empty())
            .map(|w| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(w.set)
                    .dst_binding(w.binding)
                    .dst_array_element(w.array_element)
                    .descriptor_type(w.descriptor_type);
                if w.images.is_empty() {
                    builder.buffer_info(&w.buffers).build()
                } else {
                    builder.image_info(&w.images).build()
                }
            })
            .collect();
        unsafe { self.logical.device.update_descriptor_sets(&raw, &[]) };
    }

    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe { self.logical.device.create_shader_module(&info, None) }.context("vkCreateShaderModule")
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.logical.device.destroy_shader_module(module, None) };
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        unsafe { self.logical.device.create_pipeline_layout(&info, None) }.context("vkCreatePipelineLayout")
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.logical.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> VulkanResult<vk::Pipeline> {
        let mut stages = vec![vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(desc.vertex.0)
            .name(desc.vertex.1)
            .build()];
        if let Some((module, entry)) = desc.fragment {
            stages.push(
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(module)
                    .name(entry)
                    .build(),
            );
        }

        // Vertices are pulled from storage buffers through device addresses
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder().topology(desc.topology);
        let viewport = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(desc.polygon_mode)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .depth_bias_enable(desc.depth_bias)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);
        let attachments: Vec<_> = desc.color_formats.iter().map(|_| blend_attachment(desc.blend)).collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&attachments);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_compare.is_some())
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(desc.depth_compare.unwrap_or(vk::CompareOp::NEVER))
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);
        let dynamic = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&desc.dynamic_states);
        let mut rendering = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&desc.color_formats)
            .depth_attachment_format(desc.depth_format);

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .depth_stencil_state(&depth_stencil)
            .dynamic_state(&dynamic)
            .layout(desc.layout)
            .push_next(&mut rendering)
            .build();

        let pipelines = unsafe {
            self.logical
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        }
        .map_err(|(_, result)| VulkanError::call("vkCreateGraphicsPipelines", result))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::call("vkCreateGraphicsPipelines", vk::Result::ERROR_UNKNOWN))
    }

    fn create_compute_pipeline(
        &self,
        layout: vk::PipelineLayout,
        module: vk::ShaderModule,
        entry_point: &CStr,
    ) -> VulkanResult<vk::Pipeline> {
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(entry_point)
            .build();
        let info = vk::ComputePipelineCreateInfo::builder().stage(stage).layout(layout).build();

        let pipelines = unsafe {
            self.logical
                .device
                .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
        }
        .map_err(|(_, result)| VulkanError::call("vkCreateComputePipelines", result))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::call("vkCreateComputePipelines", vk::Result::ERROR_UNKNOWN))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.logical.device.destroy_pipeline(pipeline, None) };
    }

    fn create_swapchain(&self, extent: vk::Extent2D, old: vk::SwapchainKHR) -> VulkanResult<SwapchainImages> {
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical.device, self.surface)
        }
        .context("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        let surface_format = self.surface_format()?;
        let present_mode = self.present_mode()?;

        let extent = if capabilities.current_extent.width == u32::MAX {
            vk::Extent2D {
                width: extent
                    .width
                    .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
                height: extent
                    .height
                    .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
            }
        } else {
            capabilities.current_extent
        };

        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let families = [self.physical.graphics_family, self.physical.present_family];
        let mut info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);
        info = if families[0] == families[1] {
            info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            info.image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        };

        let handle = unsafe { self.logical.swapchain_loader.create_swapchain(&info, None) }.context("vkCreateSwapchainKHR")?;
        let images = match unsafe { self.logical.swapchain_loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(result) => {
                unsafe { self.logical.swapchain_loader.destroy_swapchain(handle, None) };
                return Err(VulkanError::call("vkGetSwapchainImagesKHR", result));
            }
        };

        log::info!(
            "Created swapchain {}x{} {:?} {:?} with {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            images.len()
        );
        Ok(SwapchainImages {
            handle,
            images,
            format: surface_format.format,
            extent,
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.logical.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> VulkanResult<AcquireOutcome> {
        match unsafe {
            self.logical
                .swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, semaphore, vk::Fence::null())
        } {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(result) => Err(VulkanError::call("vkAcquireNextImageKHR", result)),
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VulkanResult<PresentOutcome> {
        let wait = [wait_semaphore];
        let swapchains = [swapchain];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe {
            self.logical
                .swapchain_loader
                .queue_present(self.logical.present_queue, &info)
        } {
            Ok(suboptimal) => Ok(PresentOutcome::Presented { suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(result) => Err(VulkanError::call("vkQueuePresentKHR", result)),
        }
    }

    fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        memory_barriers: &[vk::MemoryBarrier2],
        buffer_barriers: &[vk::BufferMemoryBarrier2],
        image_barriers: &[vk::ImageMemoryBarrier2],
    ) {
        let info = vk::DependencyInfo::builder()
            .memory_barriers(memory_barriers)
            .buffer_memory_barriers(buffer_barriers)
            .image_memory_barriers(image_barriers);
        unsafe { self.logical.device.cmd_pipeline_barrier2(command_buffer, &info) };
    }

    fn cmd_copy_buffer(&self, command_buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.logical.device.cmd_copy_buffer(command_buffer, src, dst, regions) };
    }

    fn cmd_clear_depth_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: vk::ClearDepthStencilValue,
        range: vk::ImageSubresourceRange,
    ) {
        unsafe {
            self.logical
                .device
                .cmd_clear_depth_stencil_image(command_buffer, image, layout, &value, &[range]);
        }
    }

    fn cmd_clear_color_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: vk::ClearColorValue,
        range: vk::ImageSubresourceRange,
    ) {
        unsafe {
            self.logical
                .device
                .cmd_clear_color_image(command_buffer, image, layout, &value, &[range]);
        }
    }

    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::ImageBlit,
        filter: vk::Filter,
    ) {
        unsafe {
            self.logical
                .device
                .cmd_blit_image(command_buffer, src, src_layout, dst, dst_layout, &[region], filter);
        }
    }

    fn cmd_begin_rendering(&self, command_buffer: vk::CommandBuffer, attachments: &RenderingAttachments) {
        let color: Vec<_> = attachments.color.iter().map(rendering_attachment).collect();
        let depth = attachments.depth.as_ref().map(rendering_attachment);

        let mut info = vk::RenderingInfo::builder()
            .render_area(attachments.render_area)
            .layer_count(1)
            .color_attachments(&color);
        if let Some(depth) = depth.as_ref() {
            info = info.depth_attachment(depth);
        }
        unsafe { self.logical.device.cmd_begin_rendering(command_buffer, &info) };
    }

    fn cmd_end_rendering(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.logical.device.cmd_end_rendering(command_buffer) };
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe { self.logical.device.cmd_bind_pipeline(command_buffer, bind_point, pipeline) };
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.logical
                .device
                .cmd_bind_descriptor_sets(command_buffer, bind_point, layout, first_set, sets, &[]);
        }
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    ) {
        unsafe {
            self.logical
                .device
                .cmd_push_constants(command_buffer, layout, stages, offset, bytes);
        }
    }

    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.logical.device.cmd_set_viewport(command_buffer, 0, &[viewport]) };
    }

    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.logical.device.cmd_set_scissor(command_buffer, 0, &[scissor]) };
    }

    fn cmd_set_depth_bias(&self, command_buffer: vk::CommandBuffer, constant: f32, clamp: f32, slope: f32) {
        unsafe { self.logical.device.cmd_set_depth_bias(command_buffer, constant, clamp, slope) };
    }

    fn cmd_set_line_width(&self, command_buffer: vk::CommandBuffer, width: f32) {
        unsafe { self.logical.device.cmd_set_line_width(command_buffer, width) };
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.logical
                .device
                .cmd_bind_index_buffer(command_buffer, buffer, offset, index_type);
        }
    }

    fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.logical
                .device
                .cmd_draw(command_buffer, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.logical.device.cmd_draw_indexed(
                command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.logical.device.cmd_dispatch(command_buffer, x, y, z) };
    }
}

/// Device and allocator handed to the renderer
pub struct VulkanContext {
    // Dropped before the device
    allocator: Arc<VmaAllocator>,
    device: Arc<AshDevice>,
}

impl VulkanContext {
    /// Bring up instance, surface, physical and logical device, and the allocator
    pub fn new(
        window: &mut dyn WindowBackend,
        app_name: &str,
        enable_validation: bool,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, app_name, enable_validation)?;
        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window
            .create_surface(instance.instance.handle())
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to create surface: {e}")))?;

        let physical = match PhysicalDeviceInfo::select_suitable_device(&instance.instance, surface, &surface_loader) {
            Ok(physical) => physical,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };
        let logical = match LogicalDevice::new(&instance.instance, &physical) {
            Ok(logical) => logical,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let device = Arc::new(AshDevice {
            logical,
            surface_loader,
            surface,
            physical,
            preferred_present_mode,
            instance,
        });
        let owner: Arc<dyn GpuDevice> = device.clone();
        let allocator = Arc::new(VmaAllocator::new(
            device.raw_instance(),
            device.raw(),
            device.physical_device().device,
            owner,
        )?);

        Ok(Self { allocator, device })
    }

    /// Device as the renderer sees it
    pub fn device(&self) -> Arc<dyn GpuDevice> {
        self.device.clone()
    }

    /// Allocator as the renderer sees it
    pub fn allocator(&self) -> Arc<dyn MemoryAllocator> {
        self.allocator.clone()
    }

    /// Name of the selected GPU
    pub fn device_name(&self) -> String {
        self.device.physical_device().name()
    }
}
