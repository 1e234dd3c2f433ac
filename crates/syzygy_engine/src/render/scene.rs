//! Scene state edited by the application and the UI
//!
//! Everything here is CPU-side. Each frame the renderer converts it into the `Gpu*` records
//! below and stages them through [`SceneGpuBuffers`](super::scene_buffers::SceneGpuBuffers).

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::foundation::math::{
    look_at, orthographic_reversed, perspective_reversed, to_gpu, GpuMat4, Mat4, Vec3,
};

/// Perspective camera
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// Eye position in world space
    pub position: Vec3,
    /// Point the camera looks at
    pub target: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Near plane distance
    pub near: f32,
    /// Far plane distance
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 6.0),
            target: Vec3::zeros(),
            fov_y: 70f32.to_radians(),
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// World to view
    pub fn view(&self) -> Mat4 {
        look_at(self.position, self.target, Vec3::y())
    }

    /// View to clip with reversed depth
    pub fn projection(&self, aspect: f32) -> Mat4 {
        perspective_reversed(self.fov_y, aspect, self.near, self.far)
    }

    /// GPU record for a framebuffer of the given aspect ratio
    pub fn to_gpu(&self, aspect: f32) -> GpuCamera {
        let view = self.view();
        let projection = self.projection(aspect);
        let view_projection = projection * view;
        let inverse = view_projection.try_inverse().unwrap_or_else(Mat4::identity);
        GpuCamera {
            view: to_gpu(&view),
            projection: to_gpu(&projection),
            view_projection: to_gpu(&view_projection),
            inverse_view_projection: to_gpu(&inverse),
            position: [self.position.x, self.position.y, self.position.z, 1.0],
        }
    }
}

/// Camera as read by shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuCamera {
    /// World to view
    pub view: GpuMat4,
    /// View to clip
    pub projection: GpuMat4,
    /// World to clip
    pub view_projection: GpuMat4,
    /// Clip to world
    pub inverse_view_projection: GpuMat4,
    /// Eye position, w = 1
    pub position: [f32; 4],
}

/// Parameters of the single-scattering sky model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Atmosphere {
    /// Direction towards the sun
    pub sun_direction: Vec3,
    /// Sun radiance scale
    pub sun_intensity: f32,
    /// Rayleigh scattering coefficients per colour channel
    pub rayleigh_scattering: Vec3,
    /// Mie scattering coefficient
    pub mie_scattering: f32,
    /// Mie phase anisotropy
    pub mie_anisotropy: f32,
    /// Planet radius in metres
    pub planet_radius: f32,
    /// Radius of the top of the atmosphere in metres
    pub atmosphere_radius: f32,
    /// Exposure applied before tonemapping
    pub exposure: f32,
}

impl Default for Atmosphere {
    fn default() -> Self {
        Self {
            sun_direction: Vec3::new(0.3, 0.8, 0.2).normalize(),
            sun_intensity: 20.0,
            rayleigh_scattering: Vec3::new(5.8e-6, 13.5e-6, 33.1e-6),
            mie_scattering: 21e-6,
            mie_anisotropy: 0.76,
            planet_radius: 6_371e3,
            atmosphere_radius: 6_471e3,
            exposure: 1.0,
        }
    }
}

impl Atmosphere {
    /// GPU record
    pub fn to_gpu(&self) -> GpuAtmosphere {
        let sun = self.sun_direction.normalize();
        let rayleigh = self.rayleigh_scattering;
        GpuAtmosphere {
            sun_direction_intensity: [sun.x, sun.y, sun.z, self.sun_intensity],
            scattering: [rayleigh.x, rayleigh.y, rayleigh.z, self.mie_scattering],
            radii: [self.planet_radius, self.atmosphere_radius, self.mie_anisotropy, self.exposure],
        }
    }
}

/// Atmosphere as read by shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuAtmosphere {
    /// xyz direction towards the sun, w intensity
    pub sun_direction_intensity: [f32; 4],
    /// xyz Rayleigh coefficients, w Mie coefficient
    pub scattering: [f32; 4],
    /// Planet radius, atmosphere radius, Mie anisotropy, exposure
    pub radii: [f32; 4],
}

/// Light at infinity casting an orthographic shadow
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalLight {
    /// Direction the light travels
    pub direction: Vec3,
    /// Linear colour
    pub color: Vec3,
    /// Intensity multiplier
    pub strength: f32,
    /// Centre of the region covered by the shadow map
    pub shadow_center: Vec3,
    /// Half extent of the shadow frustum in world units
    pub shadow_extent: f32,
    /// Depth range of the shadow frustum
    pub shadow_depth: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.3, -1.0, -0.2).normalize(),
            color: Vec3::new(1.0, 1.0, 1.0),
            strength: 1.0,
            shadow_center: Vec3::zeros(),
            shadow_extent: 20.0,
            shadow_depth: 100.0,
        }
    }
}

impl DirectionalLight {
    /// World to shadow clip space
    pub fn projection_view(&self) -> Mat4 {
        let direction = self.direction.normalize();
        let half_depth = self.shadow_depth * 0.5;
        let eye = self.shadow_center - direction * half_depth;
        let view = look_at(eye, self.shadow_center, Vec3::y());
        let e = self.shadow_extent;
        orthographic_reversed(-e, e, -e, e, 0.0, self.shadow_depth) * view
    }

    /// GPU record
    pub fn to_gpu(&self) -> GpuDirectionalLight {
        let d = self.direction.normalize();
        GpuDirectionalLight {
            color: [self.color.x, self.color.y, self.color.z, self.strength],
            direction: [d.x, d.y, d.z, 0.0],
        }
    }
}

/// Directional light as read by shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuDirectionalLight {
    /// rgb colour, w strength
    pub color: [f32; 4],
    /// xyz travel direction
    pub direction: [f32; 4],
}

/// Cone light casting a perspective shadow
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpotLight {
    /// Position in world space
    pub position: Vec3,
    /// Direction the cone points
    pub direction: Vec3,
    /// Linear colour
    pub color: Vec3,
    /// Intensity multiplier
    pub strength: f32,
    /// Half angle of the cone in radians
    pub cone_angle: f32,
    /// Shadow near plane
    pub near: f32,
    /// Range of the light and far plane of its shadow
    pub range: f32,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 5.0, 0.0),
            direction: Vec3::new(0.0, -1.0, 0.0),
            color: Vec3::new(1.0, 1.0, 1.0),
            strength: 10.0,
            cone_angle: 30f32.to_radians(),
            near: 0.1,
            range: 50.0,
        }
    }
}

impl SpotLight {
    /// World to shadow clip space
    pub fn projection_view(&self) -> Mat4 {
        let view = look_at(self.position, self.position + self.direction.normalize(), Vec3::y());
        perspective_reversed(2.0 * self.cone_angle, 1.0, self.near, self.range) * view
    }

    /// GPU record
    pub fn to_gpu(&self) -> GpuSpotLight {
        let p = self.position;
        let d = self.direction.normalize();
        GpuSpotLight {
            color: [self.color.x, self.color.y, self.color.z, self.strength],
            position: [p.x, p.y, p.z, self.range],
            direction: [d.x, d.y, d.z, self.cone_angle.cos()],
        }
    }
}

/// Spot light as read by shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuSpotLight {
    /// rgb colour, w strength
    pub color: [f32; 4],
    /// xyz position, w range
    pub position: [f32; 4],
    /// xyz direction, w cosine of the cone half angle
    pub direction: [f32; 4],
}

/// Per-instance transforms as read by shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuInstance {
    /// Object to world
    pub model: GpuMat4,
    /// Inverse transpose of `model` for normals
    pub normal: GpuMat4,
}

impl GpuInstance {
    /// Record for one model matrix
    pub fn new(model: &Mat4) -> Self {
        let normal = model
            .try_inverse()
            .map_or_else(Mat4::identity, |inverse| inverse.transpose());
        Self {
            model: to_gpu(model),
            normal: to_gpu(&normal),
        }
    }
}

/// Coloured world-space segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugLine {
    /// Start point
    pub from: Vec3,
    /// End point
    pub to: Vec3,
    /// Linear RGBA colour
    pub color: [f32; 4],
}

/// Debug line vertex as read by shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DebugLineVertex {
    /// xyz position, w = 1
    pub position: [f32; 4],
    /// Linear RGBA colour
    pub color: [f32; 4],
}

impl DebugLine {
    /// Both endpoints as vertices
    pub fn vertices(&self) -> [DebugLineVertex; 2] {
        let vertex = |p: Vec3| DebugLineVertex {
            position: [p.x, p.y, p.z, 1.0],
            color: self.color,
        };
        [vertex(self.from), vertex(self.to)]
    }
}

/// Everything the renderer draws
#[derive(Debug, Clone)]
pub struct SceneState {
    cameras: Vec<Camera>,
    active_camera: usize,
    atmospheres: Vec<Atmosphere>,
    active_atmosphere: usize,
    selected_mesh: usize,
    /// Directional lights, shadowed in order
    pub directional_lights: Vec<DirectionalLight>,
    /// Spot lights, shadowed after the directional lights
    pub spot_lights: Vec<SpotLight>,
    /// Model matrices of the instances of the selected mesh
    pub instances: Vec<Mat4>,
    /// Lines drawn over the lit image this frame
    pub debug_lines: Vec<DebugLine>,
}

impl Default for SceneState {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneState {
    /// One default camera and atmosphere, no lights or instances
    pub fn new() -> Self {
        Self {
            cameras: vec![Camera::default()],
            active_camera: 0,
            atmospheres: vec![Atmosphere::default()],
            active_atmosphere: 0,
            selected_mesh: 0,
            directional_lights: Vec::new(),
            spot_lights: Vec::new(),
            instances: vec![Mat4::identity()],
            debug_lines: Vec::new(),
        }
    }

    /// Cameras
    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    /// Cameras, mutably
    pub fn cameras_mut(&mut self) -> &mut Vec<Camera> {
        &mut self.cameras
    }

    /// Atmosphere parameter sets
    pub fn atmospheres(&self) -> &[Atmosphere] {
        &self.atmospheres
    }

    /// Atmosphere parameter sets, mutably
    pub fn atmospheres_mut(&mut self) -> &mut Vec<Atmosphere> {
        &mut self.atmospheres
    }

    /// Index of the camera used for rendering
    pub fn active_camera(&self) -> usize {
        self.active_camera
    }

    /// Index of the atmosphere used for rendering
    pub fn active_atmosphere(&self) -> usize {
        self.active_atmosphere
    }

    /// Index of the mesh drawn this frame
    pub fn selected_mesh(&self) -> usize {
        self.selected_mesh
    }

    /// Render through camera `index`; an invalid index falls back to camera 0
    pub fn set_active_camera(&mut self, index: usize) {
        if index < self.cameras.len() {
            self.active_camera = index;
        } else {
            log::warn!(
                "Camera index {index} out of range ({} cameras), using camera 0",
                self.cameras.len()
            );
            self.active_camera = 0;
        }
    }

    /// Light the sky with atmosphere `index`; an invalid index falls back to atmosphere 0
    pub fn set_active_atmosphere(&mut self, index: usize) {
        if index < self.atmospheres.len() {
            self.active_atmosphere = index;
        } else {
            log::warn!(
                "Atmosphere index {index} out of range ({} atmospheres), using atmosphere 0",
                self.atmospheres.len()
            );
            self.active_atmosphere = 0;
        }
    }

    /// Draw mesh `index` out of `mesh_count`; out-of-range requests are ignored
    pub fn select_mesh(&mut self, index: usize, mesh_count: usize) -> bool {
        if index < mesh_count {
            self.selected_mesh = index;
            true
        } else {
            log::warn!("Mesh index {index} out of range ({mesh_count} meshes), keeping {}", self.selected_mesh);
            false
        }
    }

    /// Re-check the active indices after the arrays were edited
    ///
    /// Also keeps at least one camera and one atmosphere around.
    pub fn validate_indices(&mut self) {
        if self.cameras.is_empty() {
            log::warn!("Scene has no cameras, adding a default one");
            self.cameras.push(Camera::default());
        }
        if self.atmospheres.is_empty() {
            log::warn!("Scene has no atmospheres, adding a default one");
            self.atmospheres.push(Atmosphere::default());
        }
        if self.active_camera >= self.cameras.len() {
            self.set_active_camera(self.active_camera);
        }
        if self.active_atmosphere >= self.atmospheres.len() {
            self.set_active_atmosphere(self.active_atmosphere);
        }
    }

    /// Projection*view of every shadow-casting light, directional first, in input order
    pub fn light_projections(&self) -> Vec<Mat4> {
        light_projections(&self.directional_lights, &self.spot_lights)
    }
}

/// Projection*view per light, directional lights first, each group in input order
pub fn light_projections(directional: &[DirectionalLight], spot: &[SpotLight]) -> Vec<Mat4> {
    directional
        .iter()
        .map(DirectionalLight::projection_view)
        .chain(spot.iter().map(SpotLight::projection_view))
        .collect()
}
