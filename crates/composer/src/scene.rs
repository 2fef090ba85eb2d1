use glam::Vec3;

use crate::params::TextureId;
use crate::ComposerError;

/// Upper bound on scene spheres; the GPU scene block is sized for this many.
pub const MAX_SPHERES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToneMapping {
    None,
    #[default]
    AcesFilmic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Light shines from this position towards the origin.
    pub position: Vec3,
    pub color: [f32; 3],
    pub intensity: f32,
}

impl DirectionalLight {
    /// Unit vector from a surface towards the light.
    pub fn direction(&self) -> Vec3 {
        self.position.normalize_or_zero()
    }
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.25, 3.0, -2.25),
            color: [1.0, 1.0, 1.0],
            intensity: 3.0,
        }
    }
}

/// Analytic stand-in for a loaded model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
    pub color: [f32; 3],
    /// 0 is a perfect mirror of the environment, 1 is fully diffuse.
    pub roughness: f32,
    pub metalness: f32,
}

impl Sphere {
    pub fn new(center: Vec3, radius: f32, color: [f32; 3]) -> Self {
        Self {
            center,
            radius,
            color,
            roughness: 0.5,
            metalness: 0.0,
        }
    }

    pub fn with_material(mut self, roughness: f32, metalness: f32) -> Self {
        self.roughness = roughness.clamp(0.0, 1.0);
        self.metalness = metalness.clamp(0.0, 1.0);
        self
    }

    /// Distance along the ray to the nearest hit in front of the origin.
    pub fn intersect(&self, origin: Vec3, direction: Vec3) -> Option<f32> {
        let oc = origin - self.center;
        let b = oc.dot(direction);
        let c = oc.length_squared() - self.radius * self.radius;
        let discriminant = b * b - c;
        if discriminant < 0.0 {
            return None;
        }
        let root = discriminant.sqrt();
        let near = -b - root;
        if near > 1.0e-4 {
            return Some(near);
        }
        let far = -b + root;
        (far > 1.0e-4).then_some(far)
    }
}

/// Everything the base render stage rasterizes.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub clear_color: [f32; 3],
    pub environment: Option<TextureId>,
    pub environment_intensity: f32,
    pub light: DirectionalLight,
    spheres: Vec<Sphere>,
    pub tone_mapping: ToneMapping,
    pub exposure: f32,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0],
            environment: None,
            environment_intensity: 2.5,
            light: DirectionalLight::default(),
            spheres: Vec::new(),
            tone_mapping: ToneMapping::AcesFilmic,
            exposure: 1.0,
        }
    }

    pub fn add_sphere(&mut self, sphere: Sphere) -> Result<(), ComposerError> {
        if self.spheres.len() >= MAX_SPHERES {
            return Err(ComposerError::TooManySpheres { max: MAX_SPHERES });
        }
        self.spheres.push(sphere);
        Ok(())
    }

    pub fn spheres(&self) -> &[Sphere] {
        &self.spheres
    }

    pub fn set_environment(&mut self, texture: TextureId) {
        self.environment = Some(texture);
    }

    /// Closest sphere hit along the ray.
    pub fn trace(&self, origin: Vec3, direction: Vec3) -> Option<(f32, &Sphere)> {
        self.spheres
            .iter()
            .filter_map(|sphere| sphere.intersect(origin, direction).map(|t| (t, sphere)))
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

/// Equirectangular texture coordinate for a world direction.
pub fn equirect_uv(direction: Vec3) -> [f32; 2] {
    let u = direction.z.atan2(direction.x) / (2.0 * std::f32::consts::PI) + 0.5;
    let v = 0.5 - direction.y.clamp(-1.0, 1.0).asin() / std::f32::consts::PI;
    [u, v]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ninth_sphere() {
        let mut scene = Scene::new();
        for index in 0..MAX_SPHERES {
            scene
                .add_sphere(Sphere::new(Vec3::X * index as f32, 0.5, [1.0; 3]))
                .unwrap();
        }
        assert!(matches!(
            scene.add_sphere(Sphere::new(Vec3::ZERO, 1.0, [1.0; 3])),
            Err(ComposerError::TooManySpheres { max: MAX_SPHERES })
        ));
    }

    #[test]
    fn trace_returns_nearest_hit() {
        let mut scene = Scene::new();
        scene
            .add_sphere(Sphere::new(Vec3::new(0.0, 0.0, -10.0), 1.0, [1.0, 0.0, 0.0]))
            .unwrap();
        scene
            .add_sphere(Sphere::new(Vec3::new(0.0, 0.0, -5.0), 1.0, [0.0, 1.0, 0.0]))
            .unwrap();
        let (t, sphere) = scene.trace(Vec3::ZERO, -Vec3::Z).unwrap();
        assert!((t - 4.0).abs() < 1.0e-4);
        assert_eq!(sphere.color, [0.0, 1.0, 0.0]);
        assert!(scene.trace(Vec3::ZERO, Vec3::Z).is_none());
    }

    #[test]
    fn equirect_maps_up_to_top_row() {
        assert!(equirect_uv(Vec3::Y)[1].abs() < 1.0e-6);
        assert!((equirect_uv(-Vec3::Y)[1] - 1.0).abs() < 1.0e-6);
        assert!((equirect_uv(Vec3::X)[0] - 0.5).abs() < 1.0e-6);
    }
}
