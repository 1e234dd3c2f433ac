//! Per-frame GPU copies of the scene
//!
//! One [`SceneGpuBuffers`] exists per frame slot, so the staging memory written for frame `n`
//! is never the memory the copy of frame `n - 1` may still be reading.

use ash::vk;
use std::sync::Arc;

use super::scene::{
    DebugLineVertex, GpuAtmosphere, GpuCamera, GpuDirectionalLight, GpuInstance, GpuSpotLight, SceneState,
};
use crate::core::config::SceneCapacities;
use crate::render::backends::vulkan::{
    CommandRecorder, GpuDevice, MemoryAllocator, TypedStagedBuffer, VulkanResult,
};

/// Shader stages that read scene buffers
pub const SCENE_READ_STAGES: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::VERTEX_SHADER.as_raw()
        | vk::PipelineStageFlags2::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw(),
);

/// Element counts staged for the current frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneCounts {
    /// Cameras
    pub cameras: u32,
    /// Atmospheres
    pub atmospheres: u32,
    /// Directional lights
    pub directional_lights: u32,
    /// Spot lights
    pub spot_lights: u32,
    /// Instances
    pub instances: u32,
    /// Debug line vertices
    pub debug_line_vertices: u32,
}

/// Staged buffers for every scene array of one frame slot
pub struct SceneGpuBuffers {
    cameras: TypedStagedBuffer<GpuCamera>,
    atmospheres: TypedStagedBuffer<GpuAtmosphere>,
    directional_lights: TypedStagedBuffer<GpuDirectionalLight>,
    spot_lights: TypedStagedBuffer<GpuSpotLight>,
    instances: TypedStagedBuffer<GpuInstance>,
    debug_lines: TypedStagedBuffer<DebugLineVertex>,
    counts: SceneCounts,
}

impl SceneGpuBuffers {
    /// Allocate every array at its configured capacity
    pub fn new(
        device: &dyn GpuDevice,
        allocator: &Arc<dyn MemoryAllocator>,
        capacities: &SceneCapacities,
    ) -> VulkanResult<Self> {
        let usage = vk::BufferUsageFlags::STORAGE_BUFFER;
        Ok(Self {
            cameras: TypedStagedBuffer::allocate(device, allocator, capacities.cameras as usize, usage)?,
            atmospheres: TypedStagedBuffer::allocate(device, allocator, capacities.atmospheres as usize, usage)?,
            directional_lights: TypedStagedBuffer::allocate(
                device,
                allocator,
                capacities.directional_lights as usize,
                usage,
            )?,
            spot_lights: TypedStagedBuffer::allocate(device, allocator, capacities.spot_lights as usize, usage)?,
            instances: TypedStagedBuffer::allocate(device, allocator, capacities.instances as usize, usage)?,
            debug_lines: TypedStagedBuffer::allocate(
                device,
                allocator,
                capacities.debug_line_vertices as usize,
                usage,
            )?,
            counts: SceneCounts::default(),
        })
    }

    /// Convert `scene` and overwrite the staged contents
    ///
    /// Arrays longer than their buffer are truncated with a warning.
    pub fn stage(&mut self, scene: &SceneState, aspect: f32) {
        let cameras: Vec<_> = scene.cameras().iter().map(|c| c.to_gpu(aspect)).collect();
        let atmospheres: Vec<_> = scene.atmospheres().iter().map(|a| a.to_gpu()).collect();
        let directional: Vec<_> = scene.directional_lights.iter().map(|l| l.to_gpu()).collect();
        let spot: Vec<_> = scene.spot_lights.iter().map(|l| l.to_gpu()).collect();
        let instances: Vec<_> = scene.instances.iter().map(GpuInstance::new).collect();
        let lines: Vec<_> = scene.debug_lines.iter().flat_map(|l| l.vertices()).collect();

        self.counts = SceneCounts {
            cameras: stage_truncated(&mut self.cameras, &cameras, "cameras"),
            atmospheres: stage_truncated(&mut self.atmospheres, &atmospheres, "atmospheres"),
            directional_lights: stage_truncated(&mut self.directional_lights, &directional, "directional lights"),
            spot_lights: stage_truncated(&mut self.spot_lights, &spot, "spot lights"),
            instances: stage_truncated(&mut self.instances, &instances, "instances"),
            debug_line_vertices: stage_truncated(&mut self.debug_lines, &lines, "debug line vertices"),
        };
    }

    /// Record every copy, then the barriers making them visible to shader reads
    pub fn record_copies(&mut self, recorder: &mut CommandRecorder<'_>) -> VulkanResult<()> {
        self.cameras.record_copy_to_device(recorder)?;
        self.atmospheres.record_copy_to_device(recorder)?;
        self.directional_lights.record_copy_to_device(recorder)?;
        self.spot_lights.record_copy_to_device(recorder)?;
        self.instances.record_copy_to_device(recorder)?;
        self.debug_lines.record_copy_to_device(recorder)?;

        let access = vk::AccessFlags2::SHADER_STORAGE_READ;
        self.cameras.record_total_copy_barrier(recorder, SCENE_READ_STAGES, access);
        self.atmospheres.record_total_copy_barrier(recorder, SCENE_READ_STAGES, access);
        self.directional_lights.record_total_copy_barrier(recorder, SCENE_READ_STAGES, access);
        self.spot_lights.record_total_copy_barrier(recorder, SCENE_READ_STAGES, access);
        self.instances.record_total_copy_barrier(recorder, SCENE_READ_STAGES, access);
        self.debug_lines.record_total_copy_barrier(recorder, SCENE_READ_STAGES, access);
        Ok(())
    }

    /// Counts staged by the last [`stage`](Self::stage)
    pub fn counts(&self) -> SceneCounts {
        self.counts
    }

    /// Camera array address
    pub fn camera_address(&self) -> vk::DeviceAddress {
        self.cameras.device_address()
    }

    /// Atmosphere array address
    pub fn atmosphere_address(&self) -> vk::DeviceAddress {
        self.atmospheres.device_address()
    }

    /// Directional light array address
    pub fn directional_light_address(&self) -> vk::DeviceAddress {
        self.directional_lights.device_address()
    }

    /// Spot light array address
    pub fn spot_light_address(&self) -> vk::DeviceAddress {
        self.spot_lights.device_address()
    }

    /// Instance array address
    pub fn instance_address(&self) -> vk::DeviceAddress {
        self.instances.device_address()
    }

    /// Debug line vertex array address
    pub fn debug_line_address(&self) -> vk::DeviceAddress {
        self.debug_lines.device_address()
    }

    /// Staged instances, for in-place animation between frames
    pub fn map_instances(&mut self) -> &mut [GpuInstance] {
        self.instances.map_staged()
    }
}

fn stage_truncated<T: bytemuck::Pod>(buffer: &mut TypedStagedBuffer<T>, values: &[T], what: &str) -> u32 {
    let count = values.len().min(buffer.capacity());
    if count < values.len() {
        log::warn!(
            "Scene has {} {what}, only the first {count} fit in the frame buffer",
            values.len()
        );
    }
    buffer.overwrite_staged(&values[..count]);
    count as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::testing::{Command, MockGpu};
    use crate::render::scene::{DebugLine, SpotLight};
    use crate::foundation::math::{Mat4, Vec3};

    fn small_capacities() -> SceneCapacities {
        SceneCapacities {
            cameras: 2,
            atmospheres: 1,
            directional_lights: 2,
            spot_lights: 2,
            instances: 3,
            debug_line_vertices: 4,
        }
    }

    #[test]
    fn test_stage_truncates_to_capacity() {
        let gpu = MockGpu::new();
        let mut buffers = SceneGpuBuffers::new(gpu.device.as_ref(), &gpu.allocator, &small_capacities()).unwrap();
        let mut scene = SceneState::new();
        scene.instances = vec![Mat4::identity(); 5];
        scene.spot_lights = vec![SpotLight::default(); 1];
        scene.debug_lines = vec![
            DebugLine { from: Vec3::zeros(), to: Vec3::x(), color: [1.0; 4] };
            3
        ];

        buffers.stage(&scene, 1.5);

        let counts = buffers.counts();
        assert_eq!(counts.cameras, 1);
        assert_eq!(counts.instances, 3);
        assert_eq!(counts.spot_lights, 1);
        assert_eq!(counts.directional_lights, 0);
        assert_eq!(counts.debug_line_vertices, 4);
    }

    #[test]
    fn test_copies_precede_barriers_and_skip_empty_arrays() {
        let gpu = MockGpu::new();
        let mut buffers = SceneGpuBuffers::new(gpu.device.as_ref(), &gpu.allocator, &small_capacities()).unwrap();
        buffers.stage(&SceneState::new(), 1.0);

        let cmd = gpu.begin_commands();
        let mut recorder = CommandRecorder::new(gpu.device.as_ref(), cmd);
        buffers.record_copies(&mut recorder).unwrap();

        let commands = gpu.mock.recorded(cmd);
        let copies = commands.iter().filter(|c| matches!(c, Command::CopyBuffer { .. })).count();
        let first_barrier = commands.iter().position(|c| matches!(c, Command::Barrier { .. })).unwrap();
        // Camera, atmosphere and one instance; lights and lines are empty
        assert_eq!(copies, 3);
        assert_eq!(first_barrier, 3);
        assert_eq!(commands.len(), 6);
    }
}
