//! Pipeline objects of the frame
//!
//! Every pipeline owns its layout and pipeline handles and exposes `record_draw_commands`
//! taking exactly the resources one call needs. Fixed pipelines push a `#[repr(C)]` block
//! whose size is checked against the shader's reflected push-constant block when the
//! pipeline is created.

use crate::render::backends::vulkan::{ShaderBinary, ShaderLibrary, VulkanResult};

/// Compute background variants with swappable shaders
pub mod compute_collection;

/// Debug line overlay
pub mod debug_lines;

/// G-buffer geometry pass
pub mod deferred;

/// Deferred lighting compute pass
pub mod lighting;

/// Depth-only shadow map pass
pub mod offscreen_shadow;

/// Atmospheric sky compute pass
pub mod sky;

pub use compute_collection::{ComputeCollectionPipeline, ComputeVariant};
pub use debug_lines::{DebugLinePipeline, DebugLinePushConstants};
pub use deferred::{DeferredPipeline, GBufferPushConstants, GBufferTargets};
pub use lighting::{LightingDescriptorSets, LightingPipeline, LightingPushConstants};
pub use offscreen_shadow::{OffscreenShadowPipeline, ShadowPushConstants};
pub use sky::{SkyPipeline, SkyPushConstants};

/// Load `name` and check its push-constant block against `T`
///
/// # Panics
/// If the reflected block size differs from `size_of::<T>()`. That is a shader/host mismatch
/// and has to be fixed in one of the two sources.
pub fn load_validated<T: bytemuck::Pod>(library: &dyn ShaderLibrary, name: &str) -> VulkanResult<ShaderBinary> {
    let binary = library.load(name)?;
    validate_push_constants::<T>(&binary);
    Ok(binary)
}

/// Assert that `binary` declares a push-constant block exactly the size of `T`
///
/// # Panics
/// On size mismatch.
pub fn validate_push_constants<T: bytemuck::Pod>(binary: &ShaderBinary) {
    let host = std::mem::size_of::<T>();
    let shader = binary.push_constant_size() as usize;
    assert_eq!(
        shader,
        host,
        "push constant block of {} is {shader} bytes but {} is {host} bytes",
        binary.name(),
        std::any::type_name::<T>()
    );
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::render::backends::vulkan::testing::MockShaderLibrary;
    use crate::render::backends::vulkan::{ReflectedType, ScalarKind};
    use crate::render::backends::vulkan::rendering::reflection::ReflectedMember;

    fn vec4(name: &str, offset: u32) -> ReflectedMember {
        ReflectedMember {
            name: name.to_string(),
            offset,
            ty: ReflectedType::Vector { scalar: ScalarKind::Float { bits: 32 }, count: 4 },
        }
    }

    /// Every shader the renderer loads, with push blocks matching the host structs
    pub(crate) fn shader_library() -> MockShaderLibrary {
        use std::mem::size_of;
        MockShaderLibrary::new()
            .with_push_size(offscreen_shadow::SHADOW_VERTEX_SHADER, size_of::<ShadowPushConstants>())
            .with_push_size(deferred::GBUFFER_VERTEX_SHADER, size_of::<GBufferPushConstants>())
            .with_push_size(deferred::GBUFFER_FRAGMENT_SHADER, 0)
            .with_push_size(lighting::LIGHTING_SHADER, size_of::<LightingPushConstants>())
            .with_push_size(sky::SKY_SHADER, size_of::<SkyPushConstants>())
            .with_push_size(debug_lines::DEBUG_LINE_VERTEX_SHADER, size_of::<DebugLinePushConstants>())
            .with_push_size(debug_lines::DEBUG_LINE_FRAGMENT_SHADER, 0)
            .with_push_type(
                compute_collection::GRADIENT_SHADER,
                Some(ReflectedType::Struct(vec![
                    vec4("top", 0),
                    vec4("bottom", 16),
                    vec4("data3", 32),
                    vec4("data4", 48),
                ])),
            )
            .with_push_type(
                compute_collection::GRID_SHADER,
                Some(ReflectedType::Struct(vec![
                    vec4("lineColor", 0),
                    vec4("background", 16),
                    ReflectedMember {
                        name: "spacing".to_string(),
                        offset: 32,
                        ty: ReflectedType::Scalar(ScalarKind::Float { bits: 32 }),
                    },
                ])),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::testing::MockShaderLibrary;

    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Block {
        address: u64,
        index: u32,
        padding: u32,
    }

    #[test]
    fn test_matching_block_passes() {
        let library = MockShaderLibrary::new().with_push_size("draw.vert", 16);
        assert!(load_validated::<Block>(&library, "draw.vert").is_ok());
    }

    #[test]
    #[should_panic(expected = "push constant block of draw.vert is 12 bytes")]
    fn test_mismatched_block_panics() {
        let library = MockShaderLibrary::new().with_push_size("draw.vert", 12);
        let _ = load_validated::<Block>(&library, "draw.vert");
    }

    #[test]
    fn test_missing_shader_is_an_error_not_a_panic() {
        let library = MockShaderLibrary::new();
        assert!(load_validated::<Block>(&library, "absent.comp").is_err());
    }
}
