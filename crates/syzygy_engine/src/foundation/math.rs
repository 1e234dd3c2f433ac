//! Math utilities and types
//!
//! nalgebra aliases plus the projection conventions the renderer uses: right-handed view
//! space looking down -Z, Vulkan clip space (Y down) and reversed depth, so the near plane
//! maps to depth 1 and the far plane to depth 0.

pub use nalgebra::{Matrix3, Matrix4, Quaternion, Unit, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Column-major matrix as laid out in GPU buffers
pub type GpuMat4 = [[f32; 4]; 4];

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,
    /// Rotation quaternion
    pub rotation: Quat,
    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Convert to a transformation matrix
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }
}

/// Perspective projection with reversed depth
pub fn perspective_reversed(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let focal = 1.0 / (fov_y * 0.5).tan();
    let mut result = Mat4::zeros();
    result[(0, 0)] = focal / aspect;
    result[(1, 1)] = -focal;
    result[(2, 2)] = near / (far - near);
    result[(2, 3)] = near * far / (far - near);
    result[(3, 2)] = -1.0;
    result
}

/// Orthographic projection with reversed depth
pub fn orthographic_reversed(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let mut result = Mat4::identity();
    result[(0, 0)] = 2.0 / (right - left);
    result[(0, 3)] = -(right + left) / (right - left);
    result[(1, 1)] = -2.0 / (top - bottom);
    result[(1, 3)] = (top + bottom) / (top - bottom);
    result[(2, 2)] = 1.0 / (far - near);
    result[(2, 3)] = far / (far - near);
    result
}

/// Right-handed view matrix
pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
    // Fall back to another up vector when looking straight along it
    let forward = (target - eye).normalize();
    let up = if forward.cross(&up).norm_squared() < 1e-8 {
        Vec3::new(0.0, 0.0, 1.0)
    } else {
        up
    };
    Mat4::look_at_rh(&Point3::from(eye), &Point3::from(target), &up)
}

/// Column-major array form for GPU structs
pub fn to_gpu(matrix: &Mat4) -> GpuMat4 {
    (*matrix).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn depth_of(projection: &Mat4, view_z: f32) -> f32 {
        let clip = projection * Vec4::new(0.0, 0.0, view_z, 1.0);
        clip.z / clip.w
    }

    #[test]
    fn test_perspective_reverses_depth() {
        let projection = perspective_reversed(1.0, 1.5, 0.1, 100.0);
        assert_relative_eq!(depth_of(&projection, -0.1), 1.0, epsilon = 1e-5);
        assert_relative_eq!(depth_of(&projection, -100.0), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_orthographic_reverses_depth_and_flips_y() {
        let projection = orthographic_reversed(-10.0, 10.0, -10.0, 10.0, 1.0, 50.0);
        assert_relative_eq!(depth_of(&projection, -1.0), 1.0, epsilon = 1e-5);
        assert_relative_eq!(depth_of(&projection, -50.0), 0.0, epsilon = 1e-5);

        let top = projection * Vec4::new(0.0, 10.0, -5.0, 1.0);
        assert_relative_eq!(top.y, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_look_at_straight_down_is_finite() {
        let view = look_at(Vec3::new(0.0, 10.0, 0.0), Vec3::zeros(), Vec3::y());
        assert!(view.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_to_gpu_is_column_major() {
        let matrix = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let gpu = to_gpu(&matrix);
        assert_eq!(gpu[3], [1.0, 2.0, 3.0, 1.0]);
    }
}
