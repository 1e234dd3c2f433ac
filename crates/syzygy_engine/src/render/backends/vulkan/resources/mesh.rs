//! GPU mesh buffers
//!
//! Importer output ([`MeshData`]) is uploaded once through a host-write staging buffer and the
//! immediate submission path into a device-local vertex buffer (read by shaders through its
//! device address) and index buffer.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use super::allocator::{MemoryAllocator, MemoryPolicy};
use super::buffer::AllocatedBuffer;
use crate::render::backends::vulkan::device::GpuDevice;
use crate::render::backends::vulkan::error::{VulkanError, VulkanResult};
use crate::render::backends::vulkan::state::immediate::ImmediateSubmitter;

/// Vertex as laid out in the shader-side storage buffer
///
/// UV components are interleaved into the padding of the vec3 fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Texture coordinate U
    pub uv_x: f32,
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate V
    pub uv_y: f32,
    /// Vertex colour
    pub color: [f32; 4],
}

const _: () = assert!(std::mem::size_of::<Vertex>() == 48);

/// Index range of one primitive within a mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometrySurface {
    /// First index of the range
    pub first_index: u32,
    /// Number of indices
    pub index_count: u32,
}

/// CPU-side mesh as produced by an importer
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    /// Display name
    pub name: String,
    /// Vertices
    pub vertices: Vec<Vertex>,
    /// Triangle-list indices
    pub indices: Vec<u32>,
    /// Per-primitive index ranges
    pub surfaces: Vec<GeometrySurface>,
}

impl MeshData {
    /// Axis-aligned unit cube centred on the origin with one surface
    pub fn cube(name: impl Into<String>) -> Self {
        const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, u, v) in FACES {
            let base = vertices.len() as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let position = [0, 1, 2].map(|i| 0.5 * (normal[i] + su * u[i] + sv * v[i]));
                vertices.push(Vertex {
                    position,
                    uv_x: (su + 1.0) * 0.5,
                    normal,
                    uv_y: (sv + 1.0) * 0.5,
                    color: [1.0; 4],
                });
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self {
            name: name.into(),
            surfaces: vec![GeometrySurface {
                first_index: 0,
                index_count: indices.len() as u32,
            }],
            vertices,
            indices,
        }
    }
}

/// Device-local vertex and index buffers of one mesh
pub struct GpuMeshBuffers {
    name: String,
    vertex_buffer: AllocatedBuffer,
    index_buffer: AllocatedBuffer,
    vertex_count: u32,
    index_count: u32,
    surfaces: Vec<GeometrySurface>,
}

impl GpuMeshBuffers {
    /// Upload `mesh` and block until the copy completes
    pub fn upload(
        device: &dyn GpuDevice,
        allocator: &Arc<dyn MemoryAllocator>,
        immediate: &mut ImmediateSubmitter,
        mesh: &MeshData,
    ) -> VulkanResult<Self> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("mesh '{}' has no geometry", mesh.name),
            });
        }
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);

        let vertex_buffer = AllocatedBuffer::allocate(
            device,
            allocator,
            vertex_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryPolicy::DEVICE_LOCAL,
        )?;
        let index_buffer = AllocatedBuffer::allocate(
            device,
            allocator,
            index_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryPolicy::DEVICE_LOCAL,
        )?;

        let mut staging = AllocatedBuffer::allocate(
            device,
            allocator,
            (vertex_bytes.len() + index_bytes.len()) as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryPolicy::HOST_UPLOAD_MAPPED,
        )?;
        staging.write_bytes(0, vertex_bytes)?;
        staging.write_bytes(vertex_bytes.len(), index_bytes)?;
        staging.flush(0, staging.size())?;

        let vertex_size = vertex_bytes.len() as vk::DeviceSize;
        let index_size = index_bytes.len() as vk::DeviceSize;
        immediate.submit(|recorder| {
            recorder.copy_buffer(staging.handle(), vertex_buffer.handle(), vertex_size);
            recorder.copy_buffer_regions(
                staging.handle(),
                index_buffer.handle(),
                &[vk::BufferCopy {
                    src_offset: vertex_size,
                    dst_offset: 0,
                    size: index_size,
                }],
            );
            Ok(())
        })?;

        log::debug!(
            "Uploaded mesh '{}': {} vertices, {} indices, {} surfaces",
            mesh.name,
            mesh.vertices.len(),
            mesh.indices.len(),
            mesh.surfaces.len()
        );
        Ok(Self {
            name: mesh.name.clone(),
            vertex_buffer,
            index_buffer,
            vertex_count: mesh.vertices.len() as u32,
            index_count: mesh.indices.len() as u32,
            surfaces: mesh.surfaces.clone(),
        })
    }

    /// Mesh name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device address of the vertex storage buffer
    pub fn vertex_address(&self) -> vk::DeviceAddress {
        self.vertex_buffer.device_address()
    }

    /// Index buffer handle
    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of indices
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Per-primitive index ranges
    pub fn surfaces(&self) -> &[GeometrySurface] {
        &self.surfaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::testing::{Command, MockGpu};

    #[test]
    fn test_cube_geometry() {
        let cube = MeshData::cube("cube");
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert!(cube.vertices.iter().all(|v| v.position.iter().all(|c| c.abs() == 0.5)));
        assert_eq!(cube.surfaces[0].index_count, 36);
    }

    #[test]
    fn test_upload_copies_both_ranges_and_frees_staging() {
        let gpu = MockGpu::new();
        let mut immediate = ImmediateSubmitter::new(&gpu.device, 1_000).unwrap();
        let cube = MeshData::cube("cube");

        let mesh = GpuMeshBuffers::upload(gpu.device.as_ref(), &gpu.allocator, &mut immediate, &cube).unwrap();

        let copies: Vec<_> = gpu
            .mock
            .last_submitted_commands()
            .into_iter()
            .filter_map(|c| match c {
                Command::CopyBuffer { size, .. } => Some(size),
                _ => None,
            })
            .collect();
        assert_eq!(copies, vec![24 * 48, 36 * 4]);
        assert_ne!(mesh.vertex_address(), 0);
        // Staging is released once the upload returns
        assert_eq!(gpu.memory.live_buffers(), 2);
    }

    #[test]
    fn test_empty_mesh_rejected() {
        let gpu = MockGpu::new();
        let mut immediate = ImmediateSubmitter::new(&gpu.device, 1_000).unwrap();
        let empty = MeshData::default();
        assert!(GpuMeshBuffers::upload(gpu.device.as_ref(), &gpu.allocator, &mut immediate, &empty).is_err());
    }
}
