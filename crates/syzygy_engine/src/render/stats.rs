//! Per-frame statistics and user-adjustable renderer settings

use bitflags::bitflags;

use crate::render::backends::vulkan::DrawCounters;

bitflags! {
    /// Optional passes of the frame
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RendererFeatures: u32 {
        /// Atmosphere compute pass
        const SKY = 1 << 0;
        /// Shadow map rendering; with it off the lighting pass sees no shadow maps
        const SHADOWS = 1 << 1;
        /// Debug line overlay
        const DEBUG_LINES = 1 << 2;
        /// Selected compute-collection variant as background, before the sky
        const COMPUTE_BACKGROUND = 1 << 3;
    }
}

impl Default for RendererFeatures {
    fn default() -> Self {
        Self::SKY | Self::SHADOWS | Self::DEBUG_LINES
    }
}

/// Knobs the UI may change between frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererTunables {
    /// Constant depth bias of the shadow pass (negative with reversed depth)
    pub shadow_depth_bias_constant: f32,
    /// Slope-scaled depth bias of the shadow pass
    pub shadow_depth_bias_slope: f32,
    /// Rasterized width of debug lines in pixels
    pub debug_line_width: f32,
    /// Enabled optional passes
    pub features: RendererFeatures,
}

impl Default for RendererTunables {
    fn default() -> Self {
        Self {
            shadow_depth_bias_constant: -2.0,
            shadow_depth_bias_slope: -2.5,
            debug_line_width: 1.0,
            features: RendererFeatures::default(),
        }
    }
}

/// What the last rendered frame recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStatistics {
    /// Draw calls across every pass
    pub draw_calls: u32,
    /// Vertices of non-indexed draws
    pub vertices: u64,
    /// Indices of indexed draws
    pub indices: u64,
    /// Compute dispatches
    pub dispatches: u32,
    /// Shadow maps rendered
    pub shadow_maps_drawn: u32,
    /// Frame number the statistics belong to
    pub frame_number: u64,
}

impl DrawStatistics {
    /// Statistics of frame `frame_number` from its recorder counters
    pub fn from_counters(counters: DrawCounters, shadow_maps_drawn: u32, frame_number: u64) -> Self {
        Self {
            draw_calls: counters.draw_calls,
            vertices: counters.vertices,
            indices: counters.indices,
            dispatches: counters.dispatches,
            shadow_maps_drawn,
            frame_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_features_leave_compute_background_off() {
        let tunables = RendererTunables::default();
        assert!(tunables.features.contains(RendererFeatures::SKY | RendererFeatures::SHADOWS));
        assert!(!tunables.features.contains(RendererFeatures::COMPUTE_BACKGROUND));
        assert!(tunables.shadow_depth_bias_constant < 0.0);
    }

    #[test]
    fn test_statistics_copy_counters() {
        let counters = DrawCounters {
            draw_calls: 7,
            vertices: 12,
            indices: 360,
            dispatches: 2,
        };
        let stats = DrawStatistics::from_counters(counters, 3, 41);
        assert_eq!(stats.draw_calls, 7);
        assert_eq!(stats.indices, 360);
        assert_eq!(stats.shadow_maps_drawn, 3);
        assert_eq!(stats.frame_number, 41);
    }
}
