//! Built-in scenes
//!
//! Geometry is expressed in pixel-sized world units relative to the window:
//! the camera sits at the origin looking down +X and the room walls are
//! spheres large enough to look flat.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{CameraParams, Material, MaterialKind, SceneSnapshot, Sphere, MAX_PRIMITIVES};
use crate::error::{EngineError, EngineResult};

/// Radius used for walls, floor and ceiling
const WALL_RADIUS: f32 = 1.0e6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneKind {
    /// Closed room with colored walls and five spheres
    #[default]
    Cornell,
    /// Open sky backdrop with a mirror and a glass sphere
    Spheres,
}

/// Incremental scene construction with a capacity check per primitive
pub struct SceneBuilder {
    camera: CameraParams,
    primitives: Vec<Sphere>,
}

impl SceneBuilder {
    /// Camera at `position` looking at `look_at` with a 60 degree field of view
    pub fn new(position: Vec3, look_at: Vec3, width: u32, height: u32) -> Self {
        let camera = CameraParams {
            position: position.to_array(),
            fov: std::f32::consts::FRAC_PI_3,
            up: Vec3::Y.to_array(),
            viewport_width: width as f32,
            look_at: look_at.to_array(),
            viewport_height: height as f32,
        };
        Self {
            camera,
            primitives: Vec::with_capacity(MAX_PRIMITIVES),
        }
    }

    pub fn sphere(mut self, position: Vec3, radius: f32, material: Material) -> EngineResult<Self> {
        if self.primitives.len() == MAX_PRIMITIVES {
            return Err(EngineError::SceneCapacity {
                count: self.primitives.len() + 1,
                capacity: MAX_PRIMITIVES,
            });
        }
        self.primitives.push(Sphere {
            position: position.to_array(),
            radius,
            material,
        });
        Ok(self)
    }

    pub fn build(self) -> EngineResult<SceneSnapshot> {
        SceneSnapshot::new(self.camera, self.primitives)
    }
}

/// Build one of the built-in scenes for a `width` x `height` viewport
pub fn build_scene(kind: SceneKind, width: u32, height: u32) -> EngineResult<SceneSnapshot> {
    let scene = match kind {
        SceneKind::Cornell => cornell(width as f32, height as f32, width, height)?,
        SceneKind::Spheres => spheres(width as f32, height as f32, width, height)?,
    };
    log::info!(
        "[build_scene] Built {:?} scene with {} primitives for {}x{}",
        kind,
        scene.primitive_count(),
        width,
        height
    );
    Ok(scene)
}

fn light() -> Material {
    // 15x overdriven white
    Material::new(MaterialKind::Light, [255.0 / (256.0 / 15.0); 3])
}

fn cornell(w: f32, h: f32, width: u32, height: u32) -> EngineResult<SceneSnapshot> {
    let diffuse = Material::new(MaterialKind::Diffuse, Material::rgb8(0x99, 0x00, 0xFF));
    let metal = Material::new(MaterialKind::Metal, Material::rgb8(0xFF, 0x66, 0x33));
    let glass = Material::new(MaterialKind::Dielectric, Material::rgb8(0xCC, 0xFF, 0xFF)).with_refraction(1.5);
    let fuzz = Material::new(MaterialKind::FuzzMetal, Material::rgb8(0x99, 0xFF, 0x33));
    let left_wall = Material::new(MaterialKind::Diffuse, Material::rgb8(0x33, 0xFF, 0x00));
    let right_wall = Material::new(MaterialKind::Diffuse, Material::rgb8(0xFF, 0x00, 0x33));
    let floor = Material::new(MaterialKind::Diffuse, Material::rgb8(0xDD, 0xDD, 0xDD));

    SceneBuilder::new(Vec3::ZERO, Vec3::X, width, height)
        // light
        .sphere(Vec3::new(800.0, 1000.0 + h - 20.0, 0.0), 1000.0, light())?
        // mask around the light
        .sphere(Vec3::new(0.0, WALL_RADIUS / 10.0 + h, 0.0), WALL_RADIUS / 10.0, floor)?
        // left and right walls
        .sphere(Vec3::new(0.0, 0.0, -WALL_RADIUS - w), WALL_RADIUS, left_wall)?
        .sphere(Vec3::new(0.0, 0.0, WALL_RADIUS + w), WALL_RADIUS, right_wall)?
        // ceiling, floor, back
        .sphere(Vec3::new(0.0, WALL_RADIUS + h, 0.0), WALL_RADIUS, floor)?
        .sphere(Vec3::new(0.0, -WALL_RADIUS - h, 0.0), WALL_RADIUS, floor)?
        .sphere(Vec3::new(2000.0 + WALL_RADIUS, 0.0, 0.0), WALL_RADIUS, floor)?
        // balls
        .sphere(Vec3::new(1000.0, 200.0 - h, 350.0), 200.0, metal)?
        .sphere(Vec3::new(1300.0, 150.0 - h, 100.0), 150.0, diffuse)?
        .sphere(Vec3::new(800.0, 50.0 - h, 300.0), 50.0, fuzz)?
        .sphere(Vec3::new(1100.0, 250.0 - h, -225.0), 250.0, glass)?
        .sphere(Vec3::new(800.0, 100.0 - h, -400.0), 100.0, glass)?
        .build()
}

fn spheres(w: f32, h: f32, width: u32, height: u32) -> EngineResult<SceneSnapshot> {
    let mirror = Material::new(MaterialKind::Metal, Material::rgb8(0xFF, 0xFF, 0xFF));
    let glass = Material::new(MaterialKind::Dielectric, Material::rgb8(0xFF, 0xFF, 0xFF)).with_refraction(1.3);
    let back = Material::new(MaterialKind::Diffuse, Material::rgb8(0x66, 0xCC, 0xFF));
    let floor = Material::new(MaterialKind::Diffuse, Material::rgb8(0xFF, 0xFF, 0xFF));

    SceneBuilder::new(Vec3::ZERO, Vec3::X, width, height)
        .sphere(Vec3::new(-2000.0, 1000.0 + h, 0.0), 1000.0, light())?
        .sphere(Vec3::new(0.0, -WALL_RADIUS - h, 0.0), WALL_RADIUS, floor)?
        .sphere(Vec3::new(3000.0 + WALL_RADIUS, 0.0, 0.0), WALL_RADIUS, back)?
        .sphere(Vec3::new(0.0, WALL_RADIUS + 2.0 * w, 0.0), WALL_RADIUS, floor)?
        .sphere(Vec3::new(700.0, -200.0, 100.0), 200.0, mirror)?
        .sphere(Vec3::new(500.0, 0.0, 0.0), 200.0, glass)?
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cornell_scene_has_twelve_primitives() {
        let scene = build_scene(SceneKind::Cornell, 600, 600).expect("cornell builds");
        assert_eq!(scene.primitive_count(), 12);
        assert_eq!(scene.camera().viewport_width, 600.0);
        assert_eq!(scene.primitives()[0].material.kind, MaterialKind::Light as u32);
    }

    #[test]
    fn test_spheres_scene_has_six_primitives() {
        let scene = build_scene(SceneKind::Spheres, 800, 600).expect("spheres builds");
        assert_eq!(scene.primitive_count(), 6);
        assert_eq!(scene.primitives()[5].material.refraction, 1.3);
    }

    #[test]
    fn test_builder_rejects_overflow() {
        let material = Material::new(MaterialKind::Diffuse, [0.5; 3]);
        let mut builder = SceneBuilder::new(Vec3::ZERO, Vec3::X, 4, 4);
        for i in 0..MAX_PRIMITIVES {
            builder = builder
                .sphere(Vec3::new(i as f32, 0.0, 0.0), 1.0, material)
                .expect("within capacity");
        }
        assert!(builder.sphere(Vec3::ZERO, 1.0, material).is_err());
    }

    #[test]
    fn test_scene_kind_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            scene: SceneKind,
        }
        let parsed: Wrapper = toml::from_str("scene = \"spheres\"").expect("parse");
        assert_eq!(parsed.scene, SceneKind::Spheres);
    }
}
