//! Demo scene: a field of cubes under the sky, lit by the sun and two spot lights

use syzygy_engine::prelude::*;
use syzygy_engine::render::backends::vulkan::{CommandRecorder, VulkanResult};
use syzygy_engine::render::OverlayTarget;

const GRID_HALF_SIZE: i32 = 3;
const GRID_SPACING: f32 = 3.0;
const ORBIT_RADIUS: f32 = 18.0;
const ORBIT_SPEED: f32 = 0.15;
const STATS_INTERVAL_FRAMES: u64 = 600;

/// Orbiting camera over a grid of cubes
#[derive(Default)]
pub struct DemoScene {
    orbit_angle: f32,
    elapsed: f32,
}

impl DemoScene {
    fn build_instances(scene: &mut SceneState) {
        scene.instances.clear();
        // Ground slab
        scene.instances.push(
            Mat4::new_translation(&Vec3::new(0.0, -1.5, 0.0)) * Mat4::new_nonuniform_scaling(&Vec3::new(14.0, 0.5, 14.0)),
        );
        for x in -GRID_HALF_SIZE..=GRID_HALF_SIZE {
            for z in -GRID_HALF_SIZE..=GRID_HALF_SIZE {
                let position = Vec3::new(x as f32 * GRID_SPACING, 0.0, z as f32 * GRID_SPACING);
                scene.instances.push(Transform::from_position(position).to_matrix());
            }
        }
    }

    fn build_lights(scene: &mut SceneState) {
        scene.directional_lights = vec![DirectionalLight {
            direction: Vec3::new(-0.4, -1.0, -0.3).normalize(),
            strength: 3.0,
            shadow_extent: 16.0,
            ..DirectionalLight::default()
        }];
        scene.spot_lights = vec![
            SpotLight {
                position: Vec3::new(6.0, 8.0, 6.0),
                direction: Vec3::new(-0.5, -1.0, -0.5).normalize(),
                color: Vec3::new(1.0, 0.6, 0.3),
                strength: 40.0,
                ..SpotLight::default()
            },
            SpotLight {
                position: Vec3::new(-6.0, 8.0, -6.0),
                direction: Vec3::new(0.5, -1.0, 0.5).normalize(),
                color: Vec3::new(0.3, 0.6, 1.0),
                strength: 40.0,
                ..SpotLight::default()
            },
        ];
    }

    fn build_axes(scene: &mut SceneState) {
        let origin = Vec3::new(0.0, 2.0, 0.0);
        scene.debug_lines = [
            (Vec3::x(), [1.0, 0.0, 0.0, 1.0]),
            (Vec3::y(), [0.0, 1.0, 0.0, 1.0]),
            (Vec3::z(), [0.0, 0.0, 1.0, 1.0]),
        ]
        .into_iter()
        .map(|(axis, color)| DebugLine {
            from: origin,
            to: origin + axis * 2.0,
            color,
        })
        .collect();
    }
}

impl Application for DemoScene {
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
        let (renderer, scene) = engine.renderer_and_scene_mut();
        let cube = renderer.upload_mesh(&MeshData::cube("cube"))?;
        renderer.select_mesh(scene, cube);
        renderer.set_overlay(Box::new(ConsoleStats::default()));

        Self::build_instances(scene);
        Self::build_lights(scene);
        Self::build_axes(scene);
        log::info!(
            "Demo scene ready: {} instances, {} directional and {} spot lights",
            scene.instances.len(),
            scene.directional_lights.len(),
            scene.spot_lights.len()
        );
        Ok(())
    }

    fn update(&mut self, engine: &mut Engine, delta_time: f32) -> Result<(), AppError> {
        self.elapsed += delta_time;
        self.orbit_angle = (self.orbit_angle + ORBIT_SPEED * delta_time) % std::f32::consts::TAU;

        let scene = engine.scene_mut();
        if let Some(camera) = scene.cameras_mut().first_mut() {
            camera.position = Vec3::new(
                ORBIT_RADIUS * self.orbit_angle.cos(),
                9.0,
                ORBIT_RADIUS * self.orbit_angle.sin(),
            );
            camera.target = Vec3::zeros();
        }

        // Sweep the spot lights back and forth
        let sweep = (self.elapsed * 0.5).sin() * 0.4;
        for (i, light) in scene.spot_lights.iter_mut().enumerate() {
            let sign = if i % 2 == 0 { -1.0 } else { 1.0 };
            light.direction = Vec3::new(sign * (0.5 + sweep), -1.0, sign * (0.5 - sweep)).normalize();
        }
        Ok(())
    }

    fn cleanup(&mut self, engine: &mut Engine) {
        let stats = engine.renderer().statistics();
        log::info!(
            "Last frame: {} draw calls, {} shadow maps, {} dispatches",
            stats.draw_calls,
            stats.shadow_maps_drawn,
            stats.dispatches
        );
    }
}

/// Overlay that reports draw statistics to the log instead of drawing
#[derive(Debug, Default)]
pub struct ConsoleStats {
    last_reported: u64,
}

impl UiOverlay for ConsoleStats {
    fn build(&mut self, stats: &DrawStatistics, _tunables: &mut RendererTunables, _scene: &mut SceneState) {
        if stats.frame_number >= self.last_reported + STATS_INTERVAL_FRAMES {
            self.last_reported = stats.frame_number;
            log::info!(
                "Frame {}: {} draws, {} indices, {} dispatches, {} shadow maps",
                stats.frame_number,
                stats.draw_calls,
                stats.indices,
                stats.dispatches,
                stats.shadow_maps_drawn
            );
        }
    }

    fn record(&mut self, _recorder: &mut CommandRecorder<'_>, _target: &OverlayTarget) -> VulkanResult<()> {
        Ok(())
    }
}
