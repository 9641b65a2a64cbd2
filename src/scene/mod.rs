//! Scene input for the path tracer
//!
//! The renderer treats the scene as an immutable snapshot: a camera and a
//! bounded list of spheres, uploaded once before the first frame.

mod builder;

pub use builder::{build_scene, SceneBuilder, SceneKind};

use crate::error::{EngineError, EngineResult};

/// Capacity of the primitive buffer
pub const MAX_PRIMITIVES: usize = 20;

/// Surface class understood by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MaterialKind {
    Light = 0,
    Diffuse = 1,
    Metal = 2,
    Dielectric = 3,
    FuzzMetal = 4,
}

// GPU layout matches `struct Material` in path_trace.wgsl
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Material {
    pub color: [f32; 3],
    pub kind: u32,
    pub refraction: f32,
    pub reflection: f32,
    _padding: [f32; 2],
}

impl Material {
    pub fn new(kind: MaterialKind, color: [f32; 3]) -> Self {
        Self {
            color,
            kind: kind as u32,
            refraction: 0.0,
            reflection: 0.0,
            _padding: [0.0; 2],
        }
    }

    pub fn with_refraction(mut self, index: f32) -> Self {
        self.refraction = index;
        self
    }

    pub fn with_reflection(mut self, coefficient: f32) -> Self {
        self.reflection = coefficient;
        self
    }

    /// Color from 8-bit channels, scaled the way the scene palette expects
    pub fn rgb8(r: u8, g: u8, b: u8) -> [f32; 3] {
        [r as f32 / 256.0, g as f32 / 256.0, b as f32 / 256.0]
    }
}

// GPU layout matches `struct Sphere` in path_trace.wgsl
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Sphere {
    pub position: [f32; 3],
    pub radius: f32,
    pub material: Material,
}

// GPU layout matches `struct Camera` in path_trace.wgsl
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraParams {
    /// Center of the image plane
    pub position: [f32; 3],
    /// Vertical field of view in radians
    pub fov: f32,
    pub up: [f32; 3],
    pub viewport_width: f32,
    pub look_at: [f32; 3],
    pub viewport_height: f32,
}

/// Immutable scene handed to the renderer
#[derive(Debug, Clone)]
pub struct SceneSnapshot {
    camera: CameraParams,
    primitives: Vec<Sphere>,
}

impl SceneSnapshot {
    pub fn new(camera: CameraParams, primitives: Vec<Sphere>) -> EngineResult<Self> {
        if primitives.len() > MAX_PRIMITIVES {
            return Err(EngineError::SceneCapacity {
                count: primitives.len(),
                capacity: MAX_PRIMITIVES,
            });
        }
        Ok(Self { camera, primitives })
    }

    pub fn camera(&self) -> &CameraParams {
        &self.camera
    }

    pub fn primitives(&self) -> &[Sphere] {
        &self.primitives
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_struct_sizes() {
        assert_eq!(std::mem::size_of::<Material>(), 32);
        assert_eq!(std::mem::size_of::<Sphere>(), 48);
        assert_eq!(std::mem::size_of::<CameraParams>(), 48);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let camera = CameraParams::zeroed_for_tests();
        let sphere = Sphere {
            position: [0.0; 3],
            radius: 1.0,
            material: Material::new(MaterialKind::Diffuse, [0.5; 3]),
        };
        assert!(SceneSnapshot::new(camera, vec![sphere; MAX_PRIMITIVES]).is_ok());
        let err = SceneSnapshot::new(camera, vec![sphere; MAX_PRIMITIVES + 1]).expect_err("too many");
        assert!(matches!(err, EngineError::SceneCapacity { count: 21, capacity: 20 }));
    }

    #[test]
    fn test_material_kind_codes() {
        assert_eq!(MaterialKind::Light as u32, 0);
        assert_eq!(MaterialKind::FuzzMetal as u32, 4);
        let glass = Material::new(MaterialKind::Dielectric, [1.0; 3]).with_refraction(1.5);
        assert_eq!(glass.kind, 3);
        assert_eq!(glass.refraction, 1.5);
    }

    impl CameraParams {
        fn zeroed_for_tests() -> Self {
            bytemuck::Zeroable::zeroed()
        }
    }
}
