//! Frame driver
//!
//! Owns every GPU object of the renderer and records one frame per [`Renderer::draw_frame`]:
//!
//! ```text
//! scene buffers -> shadow maps -> G-buffer -> background/sky -> lighting -> debug lines
//!     -> blit to swapchain -> UI overlay -> present
//! ```
//!
//! A stale swapchain never fails a frame. It sets the resize flag and the frame is skipped
//! or presented as usual; the owner then calls [`Renderer::resize`] with the new window size.

use ash::vk;
use std::sync::Arc;

use super::draw_targets::{DrawTargets, DEPTH_FORMAT, DRAW_IMAGE_FORMAT, GBUFFER_FORMATS};
use super::overlay::{NoOverlay, OverlayTarget, UiOverlay};
use super::pipelines::compute_collection::DEFAULT_VARIANTS;
use super::pipelines::{
    ComputeCollectionPipeline, DebugLinePipeline, DebugLinePushConstants, DeferredPipeline, GBufferPushConstants,
    LightingDescriptorSets, LightingPipeline, LightingPushConstants, SkyPipeline, SkyPushConstants,
};
use super::scene::SceneState;
use super::scene_buffers::{SceneCounts, SceneGpuBuffers};
use super::shadow::{ShadowPassArray, ShadowPassDesc};
use super::stats::{DrawStatistics, RendererFeatures, RendererTunables};
use crate::core::config::RendererConfig;
use crate::render::backends::vulkan::resources::image::record_blit;
use crate::render::backends::vulkan::{
    AcquireOutcome, CommandRecorder, FrameRing, GpuDevice, GpuMeshBuffers, ImmediateSubmitter, MemoryAllocator, MeshData,
    PresentOutcome, ShaderBinary, ShaderLibrary, Swapchain, VulkanResult,
};

/// What happened to a requested frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Recorded, submitted and presented
    Rendered,
    /// Nothing was submitted because the swapchain needs recreating first
    Skipped,
}

/// Deferred renderer with shadow maps, sky and debug lines
pub struct Renderer {
    device: Arc<dyn GpuDevice>,
    allocator: Arc<dyn MemoryAllocator>,
    frames: FrameRing,
    swapchain: Swapchain,
    immediate: ImmediateSubmitter,
    targets: DrawTargets,
    scene_buffers: Vec<SceneGpuBuffers>,
    shadows: ShadowPassArray,
    deferred: DeferredPipeline,
    lighting: LightingPipeline,
    sky: SkyPipeline,
    debug_lines: DebugLinePipeline,
    compute: ComputeCollectionPipeline,
    meshes: Vec<GpuMeshBuffers>,
    overlay: Box<dyn UiOverlay>,
    tunables: RendererTunables,
    stats: DrawStatistics,
    acquire_timeout_ns: u64,
    resize_requested: bool,
}

impl Renderer {
    /// Create the swapchain at `extent` and every resource that depends on it
    pub fn new(
        device: &Arc<dyn GpuDevice>,
        allocator: &Arc<dyn MemoryAllocator>,
        shaders: &dyn ShaderLibrary,
        config: &RendererConfig,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let frames = FrameRing::new(device, config.frames_in_flight, config.frame_fence_timeout_ns())?;
        let swapchain = Swapchain::new(device, extent)?;
        let immediate = ImmediateSubmitter::new(device, config.immediate_timeout_ns())?;
        let targets = DrawTargets::new(
            device,
            allocator,
            swapchain.extent(),
            config.descriptor_max_sets,
            &config.descriptor_ratios,
        )?;
        let scene_buffers = (0..frames.frames_in_flight())
            .map(|_| SceneGpuBuffers::new(device.as_ref(), allocator, &config.scene))
            .collect::<VulkanResult<Vec<_>>>()?;
        let shadows = ShadowPassArray::new(
            device,
            allocator,
            shaders,
            &ShadowPassDesc {
                capacity: config.shadow_map_capacity,
                resolution: config.shadow_map_resolution,
                max_lights: config.scene.directional_lights + config.scene.spot_lights,
                frames_in_flight: frames.frames_in_flight(),
            },
        )?;

        let deferred = DeferredPipeline::new(device, shaders, GBUFFER_FORMATS, DEPTH_FORMAT)?;
        let lighting = LightingPipeline::new(
            device,
            shaders,
            targets.gbuffer_layout(),
            shadows.sampler_layout(),
            shadows.texture_layout(),
        )?;
        let sky = SkyPipeline::new(device, shaders, targets.draw_image_layout())?;
        let debug_lines = DebugLinePipeline::new(device, shaders, DRAW_IMAGE_FORMAT, DEPTH_FORMAT)?;
        let compute = ComputeCollectionPipeline::new(device, shaders, targets.draw_image_layout(), &DEFAULT_VARIANTS)?;

        log::info!(
            "Renderer ready: {}x{}, {} frames in flight, {} shadow maps",
            swapchain.extent().width,
            swapchain.extent().height,
            frames.frames_in_flight(),
            shadows.capacity()
        );
        Ok(Self {
            device: Arc::clone(device),
            allocator: Arc::clone(allocator),
            frames,
            swapchain,
            immediate,
            targets,
            scene_buffers,
            shadows,
            deferred,
            lighting,
            sky,
            debug_lines,
            compute,
            meshes: Vec::new(),
            overlay: Box::new(NoOverlay),
            tunables: RendererTunables::default(),
            stats: DrawStatistics::default(),
            acquire_timeout_ns: config.frame_fence_timeout_ns(),
            resize_requested: false,
        })
    }

    /// Upload a mesh and return its index for [`SceneState::select_mesh`]
    pub fn upload_mesh(&mut self, mesh: &MeshData) -> VulkanResult<usize> {
        let buffers = GpuMeshBuffers::upload(self.device.as_ref(), &self.allocator, &mut self.immediate, mesh)?;
        log::info!(
            "Uploaded mesh '{}' ({} vertices, {} indices)",
            buffers.name(),
            buffers.vertex_count(),
            buffers.index_count()
        );
        self.meshes.push(buffers);
        Ok(self.meshes.len() - 1)
    }

    /// Uploaded meshes
    pub fn meshes(&self) -> &[GpuMeshBuffers] {
        &self.meshes
    }

    /// Draw mesh `index` from now on; out-of-range requests are ignored
    pub fn select_mesh(&self, scene: &mut SceneState, index: usize) -> bool {
        scene.select_mesh(index, self.meshes.len())
    }

    /// Replace the UI overlay
    pub fn set_overlay(&mut self, overlay: Box<dyn UiOverlay>) {
        self.overlay = overlay;
    }

    /// Current tunables
    pub fn tunables(&self) -> &RendererTunables {
        &self.tunables
    }

    /// Tunables, mutably
    pub fn tunables_mut(&mut self) -> &mut RendererTunables {
        &mut self.tunables
    }

    /// Statistics of the last rendered frame
    pub fn statistics(&self) -> &DrawStatistics {
        &self.stats
    }

    /// Compute background variants
    pub fn compute_collection(&self) -> &ComputeCollectionPipeline {
        &self.compute
    }

    /// Compute background variants, mutably
    pub fn compute_collection_mut(&mut self) -> &mut ComputeCollectionPipeline {
        &mut self.compute
    }

    /// Rebuild compute variant `index` from `shader` while frames are in flight
    ///
    /// The replaced pipeline is destroyed once the last recorded frame has finished.
    pub fn swap_compute_shader(&mut self, index: usize, shader: &ShaderBinary) -> VulkanResult<bool> {
        self.compute.swap_shader(
            &self.device,
            index,
            shader,
            self.targets.draw_image_layout(),
            self.frames.previous_mut().deletion_queue(),
        )
    }

    /// Current swapchain size
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Ask for the swapchain to be recreated before the next frame
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    /// Whether [`resize`](Self::resize) must run before frames render again
    pub fn resize_pending(&self) -> bool {
        self.resize_requested
    }

    /// Recreate the swapchain and draw targets at `extent`
    ///
    /// Stalls until the device is idle. A zero-sized extent (minimized window) is deferred and
    /// leaves the request pending; returns whether the resize happened.
    pub fn resize(&mut self, extent: vk::Extent2D) -> VulkanResult<bool> {
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Deferring resize to empty extent {}x{}", extent.width, extent.height);
            self.resize_requested = true;
            return Ok(false);
        }

        self.device.wait_idle()?;
        self.frames.wait_all()?;
        self.swapchain.recreate(extent)?;
        self.targets.resize(self.swapchain.extent())?;
        self.resize_requested = false;

        log::info!(
            "Resized to {}x{}",
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );
        Ok(true)
    }

    /// Block until the GPU has finished every submitted frame
    pub fn wait_idle(&mut self) -> VulkanResult<()> {
        self.device.wait_idle()?;
        self.frames.wait_all()
    }

    /// Render `scene` into the next swapchain image
    ///
    /// The overlay may edit `scene` and the tunables before anything is recorded.
    pub fn draw_frame(&mut self, scene: &mut SceneState) -> VulkanResult<FrameOutcome> {
        if self.resize_requested {
            return Ok(FrameOutcome::Skipped);
        }
        self.overlay.build(&self.stats, &mut self.tunables, scene);
        scene.validate_indices();

        let frame = self.frames.begin_slot()?;
        let image_index = match self.swapchain.acquire(frame.image_acquired(), self.acquire_timeout_ns)? {
            AcquireOutcome::Acquired { image_index, suboptimal } => {
                if suboptimal {
                    self.resize_requested = true;
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire, skipping frame");
                self.resize_requested = true;
                return Ok(FrameOutcome::Skipped);
            }
        };
        let command_buffer = frame.start_recording()?;
        let render_complete = frame.render_complete();
        let slot = self.frames.slot_index();

        let device = Arc::clone(&self.device);
        let mut recorder = CommandRecorder::new(device.as_ref(), command_buffer);
        let shadow_maps_drawn = self.record_frame(&mut recorder, slot, image_index, scene)?;
        let counters = recorder.counters();

        self.frames.current_mut().submit()?;
        match self.swapchain.present(image_index, render_complete)? {
            PresentOutcome::Presented { suboptimal: false } => {}
            PresentOutcome::Presented { suboptimal: true } | PresentOutcome::OutOfDate => {
                log::debug!("Swapchain stale on present, resize requested");
                self.resize_requested = true;
            }
        }

        self.stats = DrawStatistics::from_counters(counters, shadow_maps_drawn, self.frames.frame_number());
        log::trace!("Frame {}: {:?}", self.frames.frame_number(), self.stats);
        self.frames.advance();
        Ok(FrameOutcome::Rendered)
    }

    // Records the whole frame and returns the number of shadow maps drawn
    fn record_frame(
        &mut self,
        recorder: &mut CommandRecorder<'_>,
        slot: usize,
        image_index: u32,
        scene: &SceneState,
    ) -> VulkanResult<u32> {
        let extent = self.targets.extent();
        let features = self.tunables.features;
        let aspect = extent.width as f32 / extent.height.max(1) as f32;

        let buffers = &mut self.scene_buffers[slot];
        buffers.stage(scene, aspect);
        buffers.record_copies(recorder)?;
        let buffers = &self.scene_buffers[slot];
        let counts = buffers.counts();
        let camera_index = staged_index(scene.active_camera(), counts.cameras, "camera");
        let atmosphere_index = staged_index(scene.active_atmosphere(), counts.atmospheres, "atmosphere");
        let mesh = self.meshes.get(scene.selected_mesh());
        let instance_count = if mesh.is_some() { counts.instances } else { 0 };

        // Shadows; lights truncated by the scene buffers never get a map either
        let (directional, spot) = if features.contains(RendererFeatures::SHADOWS) {
            (
                &scene.directional_lights[..counts.directional_lights as usize],
                &scene.spot_lights[..counts.spot_lights as usize],
            )
        } else {
            (&[][..], &[][..])
        };
        self.shadows.record_initialize(
            recorder,
            slot,
            self.tunables.shadow_depth_bias_constant,
            self.tunables.shadow_depth_bias_slope,
            directional,
            spot,
        )?;
        let shadow_maps_drawn = match mesh {
            Some(mesh) => {
                self.shadows
                    .record_draw_commands(recorder, mesh, buffers.instance_address(), instance_count)
            }
            None => 0,
        };
        self.shadows
            .record_transition_active_shadow_maps(recorder, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        // Geometry
        self.targets
            .record_gbuffer_transition(recorder, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        self.targets
            .record_depth_transition(recorder, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        let gbuffer_push = GBufferPushConstants {
            vertex_buffer: mesh.map_or(0, GpuMeshBuffers::vertex_address),
            instance_buffer: buffers.instance_address(),
            camera_buffer: buffers.camera_address(),
            camera_index,
            padding: 0,
        };
        self.deferred.record_draw_commands(
            recorder,
            &self.targets.gbuffer_targets(),
            mesh,
            instance_count,
            &gbuffer_push,
        );
        self.targets.record_gbuffer_transition(recorder, vk::ImageLayout::GENERAL);

        // Background
        self.targets.record_draw_image_transition(recorder, vk::ImageLayout::GENERAL);
        let draw_image_set = self.targets.draw_image_set();
        let background = features.contains(RendererFeatures::COMPUTE_BACKGROUND);
        let sky = features.contains(RendererFeatures::SKY);
        if background {
            self.compute.record_draw_commands(recorder, draw_image_set, extent);
        }
        if sky {
            if background {
                self.targets.record_draw_image_transition(recorder, vk::ImageLayout::GENERAL);
            }
            let push = SkyPushConstants {
                atmosphere_buffer: buffers.atmosphere_address(),
                camera_buffer: buffers.camera_address(),
                atmosphere_index,
                camera_index,
            };
            self.sky.record_draw_commands(recorder, draw_image_set, extent, &push);
        }
        if !background && !sky {
            recorder.clear_color_image(
                self.targets.draw_image().image(),
                vk::ImageLayout::GENERAL,
                [0.0, 0.0, 0.0, 1.0],
            );
        }
        self.targets.record_draw_image_transition(recorder, vk::ImageLayout::GENERAL);

        // Lighting
        let (shadow_sampler, shadow_textures) = self.shadows.descriptor_sets();
        let lighting_push = lighting_push_constants(buffers, counts, camera_index, atmosphere_index, &self.shadows);
        self.lighting.record_draw_commands(
            recorder,
            &LightingDescriptorSets {
                gbuffer: self.targets.gbuffer_set(),
                shadow_sampler,
                shadow_textures,
            },
            extent,
            &lighting_push,
        );

        // Debug lines
        if features.contains(RendererFeatures::DEBUG_LINES) && counts.debug_line_vertices > 0 {
            self.targets
                .record_draw_image_transition(recorder, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
            let push = DebugLinePushConstants {
                vertex_buffer: buffers.debug_line_address(),
                camera_buffer: buffers.camera_address(),
                camera_index,
                padding: 0,
            };
            self.debug_lines.record_draw_commands(
                recorder,
                self.targets.draw_image().view(),
                self.targets.depth_image().view(),
                extent,
                self.tunables.debug_line_width,
                counts.debug_line_vertices,
                &push,
            );
        }

        // Present
        self.targets
            .record_draw_image_transition(recorder, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        self.swapchain.discard_contents(image_index);
        self.swapchain
            .record_transition(recorder, image_index, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        record_blit(
            recorder,
            (self.targets.draw_image().image(), extent),
            (self.swapchain.image(image_index), self.swapchain.extent()),
        );
        self.swapchain
            .record_transition(recorder, image_index, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        self.overlay.record(
            recorder,
            &OverlayTarget {
                view: self.swapchain.view(image_index),
                extent: self.swapchain.extent(),
                format: self.swapchain.format(),
            },
        )?;
        self.swapchain
            .record_transition(recorder, image_index, vk::ImageLayout::PRESENT_SRC_KHR);

        Ok(shadow_maps_drawn)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            log::error!("Failed to wait for the GPU before teardown: {err}");
        }
    }
}

// Indices past the staged elements fall back to element 0
fn staged_index(index: usize, count: u32, what: &str) -> u32 {
    match u32::try_from(index) {
        Ok(index) if index < count => index,
        _ => {
            log::warn!("Active {what} {index} was not staged ({count} staged), using {what} 0");
            0
        }
    }
}

fn lighting_push_constants(
    buffers: &SceneGpuBuffers,
    counts: SceneCounts,
    camera_index: u32,
    atmosphere_index: u32,
    shadows: &ShadowPassArray,
) -> LightingPushConstants {
    LightingPushConstants {
        camera_buffer: buffers.camera_address(),
        atmosphere_buffer: buffers.atmosphere_address(),
        directional_light_buffer: buffers.directional_light_address(),
        spot_light_buffer: buffers.spot_light_address(),
        shadow_projection_buffer: shadows.projection_address(),
        camera_index,
        atmosphere_index,
        directional_light_count: counts.directional_lights,
        spot_light_count: counts.spot_lights,
        shadow_count: shadows.active_count(),
        padding: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SceneCapacities;
    use crate::foundation::math::Vec3;
    use crate::render::backends::vulkan::testing::{Command, Event, MockGpu};
    use crate::render::pipelines::compute_collection::GRADIENT_SHADER;
    use crate::render::pipelines::test_support::shader_library;
    use crate::render::scene::{DebugLine, DirectionalLight, SpotLight};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn renderer(gpu: &MockGpu, shadow_capacity: u32) -> Renderer {
        let config = RendererConfig::new("renderer-test").with_shadow_maps(shadow_capacity, 64);
        let mut renderer =
            Renderer::new(&gpu.device, &gpu.allocator, &shader_library(), &config, extent(320, 240)).unwrap();
        renderer.upload_mesh(&MeshData::cube("cube")).unwrap();
        renderer
    }

    fn scene_with_lights(directional: usize, spot: usize) -> SceneState {
        let mut scene = SceneState::new();
        scene.directional_lights = vec![DirectionalLight::default(); directional];
        scene.spot_lights = vec![SpotLight::default(); spot];
        scene
    }

    fn position(events: &[Event], predicate: impl Fn(&Event) -> bool) -> usize {
        events.iter().position(predicate).unwrap()
    }

    fn index_of(commands: &[Command], predicate: impl Fn(&Command) -> bool) -> usize {
        commands.iter().position(|c| predicate(c)).unwrap()
    }

    fn lighting_push(commands: &[Command]) -> LightingPushConstants {
        commands
            .iter()
            .find_map(|c| match c {
                Command::PushConstants(bytes) if bytes.len() == std::mem::size_of::<LightingPushConstants>() => {
                    Some(bytemuck::pod_read_unaligned(bytes))
                }
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_normal_frame_draws_one_shadow_map_per_light() {
        let gpu = MockGpu::new();
        let mut renderer = renderer(&gpu, 8);
        let mut scene = scene_with_lights(2, 1);

        assert_eq!(renderer.draw_frame(&mut scene).unwrap(), FrameOutcome::Rendered);

        assert_eq!(renderer.statistics().shadow_maps_drawn, 3);
        let commands = gpu.mock.last_submitted_commands();
        let indexed = commands.iter().filter(|c| matches!(c, Command::DrawIndexed { .. })).count();
        assert_eq!(indexed, 4);
        assert_eq!(lighting_push(&commands).shadow_count, 3);
        assert_eq!(renderer.statistics().draw_calls, 4);
        assert!(gpu.mock.violations().is_empty(), "{:?}", gpu.mock.violations());
    }

    #[test]
    fn test_frame_passes_recorded_in_order() {
        let gpu = MockGpu::new();
        let mut renderer = renderer(&gpu, 4);
        let mut scene = scene_with_lights(1, 0);
        scene.debug_lines.push(DebugLine {
            from: Vec3::zeros(),
            to: Vec3::new(1.0, 0.0, 0.0),
            color: [1.0, 0.0, 0.0, 1.0],
        });

        renderer.draw_frame(&mut scene).unwrap();

        let commands = gpu.mock.last_submitted_commands();
        let first_copy = index_of(&commands, |c| matches!(c, Command::CopyBuffer { .. }));
        let shadow = index_of(&commands, |c| {
            matches!(c, Command::BeginRendering { color, depth: Some(_) } if color.is_empty())
        });
        let gbuffer = index_of(&commands, |c| matches!(c, Command::BeginRendering { color, .. } if color.len() == 4));
        let sky = index_of(&commands, |c| matches!(c, Command::Dispatch(..)));
        let lines = index_of(&commands, |c| *c == Command::Draw { vertex_count: 2, instance_count: 1 });
        let blit = index_of(&commands, |c| matches!(c, Command::Blit { .. }));
        assert!(first_copy < shadow);
        assert!(shadow < gbuffer);
        assert!(gbuffer < sky);
        assert!(sky < lines);
        assert!(lines < blit);
        assert!(commands.contains(&Command::SetLineWidth(1.0)));

        match commands.last() {
            Some(Command::Barrier { images, .. }) => {
                assert_eq!(images[0].1, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
                assert_eq!(images[0].2, vk::ImageLayout::PRESENT_SRC_KHR);
            }
            other => panic!("frame ends with {other:?}"),
        }
    }

    #[test]
    fn test_fence_waited_before_reset_and_submit() {
        let gpu = MockGpu::new();
        let mut renderer = renderer(&gpu, 2);
        let mut scene = SceneState::new();

        renderer.draw_frame(&mut scene).unwrap();

        let events = gpu.mock.events();
        let acquire = position(&events, |e| matches!(e, Event::Acquire(_)));
        let fence = match events[..acquire].iter().rev().find(|e| matches!(e, Event::WaitFence(_))) {
            Some(Event::WaitFence(fence)) => *fence,
            other => panic!("no fence wait before acquire: {other:?}"),
        };
        let reset = position(&events, |e| *e == Event::ResetFence(fence));
        let submit = position(&events, |e| matches!(e, Event::Submit { fence: f, .. } if *f == fence));
        let present = position(&events, |e| matches!(e, Event::Present { .. }));
        assert!(acquire < reset);
        assert!(reset < submit);
        assert!(submit < present);
    }

    #[test]
    fn test_shadow_overflow_draws_capacity_maps() {
        let gpu = MockGpu::new();
        let mut renderer = renderer(&gpu, 2);
        let mut scene = scene_with_lights(3, 2);

        renderer.draw_frame(&mut scene).unwrap();

        assert_eq!(renderer.statistics().shadow_maps_drawn, 2);
        let push = lighting_push(&gpu.mock.last_submitted_commands());
        assert_eq!(push.shadow_count, 2);
        assert_eq!(push.directional_light_count, 3);
        assert_eq!(push.spot_light_count, 2);
    }

    #[test]
    fn test_disabled_shadows_draw_no_maps() {
        let gpu = MockGpu::new();
        let mut renderer = renderer(&gpu, 4);
        renderer.tunables_mut().features.remove(RendererFeatures::SHADOWS);
        let mut scene = scene_with_lights(2, 2);

        renderer.draw_frame(&mut scene).unwrap();

        assert_eq!(renderer.statistics().shadow_maps_drawn, 0);
        assert_eq!(lighting_push(&gpu.mock.last_submitted_commands()).shadow_count, 0);
    }

    #[test]
    fn test_background_features_select_dispatches() {
        let gpu = MockGpu::new();
        let mut renderer = renderer(&gpu, 2);
        let mut scene = SceneState::new();
        let dispatches = |commands: &[Command]| commands.iter().filter(|c| matches!(c, Command::Dispatch(..))).count();

        renderer.tunables_mut().features = RendererFeatures::empty();
        renderer.draw_frame(&mut scene).unwrap();
        let commands = gpu.mock.last_submitted_commands();
        assert_eq!(dispatches(&commands), 1);
        assert!(commands.iter().any(|c| matches!(c, Command::ClearColor { layout, .. } if *layout == vk::ImageLayout::GENERAL)));

        renderer.tunables_mut().features = RendererFeatures::SKY | RendererFeatures::COMPUTE_BACKGROUND;
        renderer.draw_frame(&mut scene).unwrap();
        let commands = gpu.mock.last_submitted_commands();
        assert_eq!(dispatches(&commands), 3);
        assert!(!commands.iter().any(|c| matches!(c, Command::ClearColor { .. })));
    }

    #[test]
    fn test_out_of_date_acquire_skips_without_touching_fence() {
        let gpu = MockGpu::new();
        let mut renderer = renderer(&gpu, 2);
        let mut scene = SceneState::new();
        gpu.mock.script_acquire(AcquireOutcome::OutOfDate);

        assert_eq!(renderer.draw_frame(&mut scene).unwrap(), FrameOutcome::Skipped);
        assert!(renderer.resize_pending());
        let events = gpu.mock.events();
        let acquire = position(&events, |e| matches!(e, Event::Acquire(_)));
        assert!(!events[acquire..]
            .iter()
            .any(|e| matches!(e, Event::ResetFence(_) | Event::Submit { .. })));

        // Nothing is acquired again until the swapchain is recreated
        assert_eq!(renderer.draw_frame(&mut scene).unwrap(), FrameOutcome::Skipped);
        let acquires = gpu.mock.events().iter().filter(|e| matches!(e, Event::Acquire(_))).count();
        assert_eq!(acquires, 1);
    }

    #[test]
    fn test_resize_recreates_swapchain_and_targets() {
        let gpu = MockGpu::new();
        let mut renderer = renderer(&gpu, 2);
        let mut scene = scene_with_lights(1, 1);
        renderer.draw_frame(&mut scene).unwrap();
        gpu.mock.script_present(PresentOutcome::OutOfDate);
        assert_eq!(renderer.draw_frame(&mut scene).unwrap(), FrameOutcome::Rendered);
        assert!(renderer.resize_pending());
        let images_before = gpu.memory.live_images();
        let events_before = gpu.mock.events().len();

        assert!(renderer.resize(extent(800, 600)).unwrap());

        let events = gpu.mock.events()[events_before..].to_vec();
        let idle = position(&events, |e| *e == Event::WaitIdle);
        let created = position(&events, |e| *e == Event::CreateSwapchain(extent(800, 600)));
        let rewritten = position(&events, |e| matches!(e, Event::ResetDescriptorPool(_)));
        assert!(idle < created);
        assert!(created < rewritten);
        assert_eq!(renderer.extent(), extent(800, 600));
        assert_eq!(gpu.mock.live("swapchain"), 1);
        assert_eq!(gpu.memory.live_images(), images_before);
        assert!(!renderer.resize_pending());

        assert_eq!(renderer.draw_frame(&mut scene).unwrap(), FrameOutcome::Rendered);
        drop(renderer);
        assert!(gpu.mock.leaked_kinds().is_empty(), "{:?}", gpu.mock.leaked_kinds());
        assert_eq!(gpu.memory.live_images(), 0);
        assert_eq!(gpu.memory.live_buffers(), 0);
        assert!(gpu.mock.violations().is_empty(), "{:?}", gpu.mock.violations());
    }

    #[test]
    fn test_empty_extent_defers_resize() {
        let gpu = MockGpu::new();
        let mut renderer = renderer(&gpu, 2);
        renderer.request_resize();

        assert!(!renderer.resize(extent(0, 0)).unwrap());
        assert!(renderer.resize_pending());
        assert!(!gpu.mock.events().contains(&Event::WaitIdle));
    }

    #[test]
    fn test_swapped_compute_shader_retired_after_last_use() {
        let gpu = MockGpu::new();
        let mut renderer = renderer(&gpu, 2);
        let mut scene = SceneState::new();
        renderer.draw_frame(&mut scene).unwrap();
        let pipelines = gpu.mock.live("pipeline");
        let shader = shader_library().load(GRADIENT_SHADER).unwrap();

        assert!(renderer.swap_compute_shader(0, &shader).unwrap());
        assert_eq!(gpu.mock.live("pipeline"), pipelines + 1);

        renderer.draw_frame(&mut scene).unwrap();
        assert_eq!(gpu.mock.live("pipeline"), pipelines + 1);
        renderer.draw_frame(&mut scene).unwrap();
        assert_eq!(gpu.mock.live("pipeline"), pipelines);
        assert!(!renderer.swap_compute_shader(9, &shader).unwrap());
    }

    #[test]
    fn test_unstaged_active_camera_resets_to_first() {
        let gpu = MockGpu::new();
        let capacities = SceneCapacities { cameras: 2, atmospheres: 1, ..SceneCapacities::default() };
        let config = RendererConfig::new("renderer-test")
            .with_shadow_maps(2, 64)
            .with_scene_capacities(capacities);
        let mut renderer =
            Renderer::new(&gpu.device, &gpu.allocator, &shader_library(), &config, extent(320, 240)).unwrap();
        let mut scene = SceneState::new();
        let camera = scene.cameras()[0];
        scene.cameras_mut().resize(4, camera);
        scene.set_active_camera(3);
        let atmosphere = scene.atmospheres()[0];
        scene.atmospheres_mut().resize(3, atmosphere);
        scene.set_active_atmosphere(2);

        assert_eq!(renderer.draw_frame(&mut scene).unwrap(), FrameOutcome::Rendered);

        let push = lighting_push(&gpu.mock.last_submitted_commands());
        assert_eq!(push.camera_index, 0);
        assert_eq!(push.atmosphere_index, 0);
    }

    #[test]
    fn test_mesh_selection_ignores_unknown_index() {
        let gpu = MockGpu::new();
        let renderer = renderer(&gpu, 2);
        let mut scene = SceneState::new();

        assert!(renderer.select_mesh(&mut scene, 0));
        assert!(!renderer.select_mesh(&mut scene, 3));
        assert_eq!(scene.selected_mesh(), 0);
    }

    #[test]
    fn test_random_frames_keep_ring_discipline() {
        let gpu = MockGpu::new();
        let mut renderer = renderer(&gpu, 4);
        let mut rng = StdRng::seed_from_u64(0x5157_0901);

        for _ in 0..40 {
            let mut scene = scene_with_lights(rng.gen_range(0..4), rng.gen_range(0..4));
            let lights = (scene.directional_lights.len() + scene.spot_lights.len()) as u32;
            match rng.gen_range(0..10) {
                0 => gpu.mock.script_acquire(AcquireOutcome::OutOfDate),
                1 => gpu.mock.script_present(PresentOutcome::OutOfDate),
                _ => {}
            }

            if renderer.draw_frame(&mut scene).unwrap() == FrameOutcome::Rendered {
                assert_eq!(renderer.statistics().shadow_maps_drawn, lights.min(4));
            }
            if renderer.resize_pending() {
                let size = extent(rng.gen_range(64..1024), rng.gen_range(64..1024));
                assert!(renderer.resize(size).unwrap());
            }
        }

        assert!(gpu.mock.violations().is_empty(), "{:?}", gpu.mock.violations());
        drop(renderer);
        assert!(gpu.mock.leaked_kinds().is_empty(), "{:?}", gpu.mock.leaked_kinds());
    }
}
