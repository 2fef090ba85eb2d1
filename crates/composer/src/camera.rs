use std::f32::consts::PI;

use glam::{Mat4, Vec3, Vec4};

/// Perspective camera with an explicitly refreshed projection matrix.
///
/// `set_aspect` alone does not touch the projection; `update_projection`
/// must follow, which is what the resize path does.
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveCamera {
    pub fov_y_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
    pub target: Vec3,
    projection: Mat4,
}

impl PerspectiveCamera {
    pub fn new(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut camera = Self {
            fov_y_degrees,
            aspect,
            near,
            far,
            position: Vec3::new(4.0, 1.0, -4.0),
            target: Vec3::ZERO,
            projection: Mat4::IDENTITY,
        };
        camera.update_projection();
        camera
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_target(mut self, target: Vec3) -> Self {
        self.target = target;
        self
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    pub fn update_projection(&mut self) {
        self.projection = Mat4::perspective_rh(
            self.fov_y_degrees.to_radians(),
            self.aspect,
            self.near,
            self.far,
        );
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, Vec3::Y)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view()
    }

    /// Inverse of `view_projection`, used to turn NDC positions into world rays.
    pub fn inverse_view_projection(&self) -> Mat4 {
        self.view_projection().inverse()
    }

    /// World-space direction through a point in normalized device coordinates.
    pub fn ray_direction(&self, inverse_view_projection: &Mat4, ndc_x: f32, ndc_y: f32) -> Vec3 {
        let far = *inverse_view_projection * Vec4::new(ndc_x, ndc_y, 1.0, 1.0);
        let point = far.truncate() / far.w;
        (point - self.position).normalize_or_zero()
    }
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self::new(75.0, 800.0 / 600.0, 0.1, 100.0)
    }
}

/// Spherical orbit around the camera target with optional damping.
///
/// Input handlers only accumulate deltas; `update` applies them to the camera
/// once per frame and decays them by the damping factor.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitControls {
    pub enable_damping: bool,
    pub damping_factor: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    delta_theta: f32,
    delta_phi: f32,
    scale: f32,
}

impl OrbitControls {
    const EPS: f32 = 1.0e-6;

    pub fn new() -> Self {
        Self {
            enable_damping: false,
            damping_factor: 0.05,
            rotate_speed: 1.0,
            zoom_speed: 1.0,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
            delta_theta: 0.0,
            delta_phi: 0.0,
            scale: 1.0,
        }
    }

    pub fn with_damping(mut self, enabled: bool, factor: f32) -> Self {
        self.enable_damping = enabled;
        self.damping_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Pointer drag of `dx`, `dy` pixels on a viewport `height` pixels tall.
    pub fn rotate(&mut self, dx: f32, dy: f32, height: f32) {
        let height = height.max(1.0);
        self.delta_theta -= 2.0 * PI * dx / height * self.rotate_speed;
        self.delta_phi -= 2.0 * PI * dy / height * self.rotate_speed;
    }

    /// Wheel input: positive values move away from the target.
    pub fn zoom(&mut self, wheel: f32) {
        let step = 0.95f32.powf(self.zoom_speed);
        if wheel > 0.0 {
            self.scale /= step;
        } else if wheel < 0.0 {
            self.scale *= step;
        }
    }

    /// Applies pending input to the camera. Returns true if the camera moved.
    pub fn update(&mut self, camera: &mut PerspectiveCamera) -> bool {
        let offset = camera.position - camera.target;
        let radius = offset.length();
        if radius <= Self::EPS {
            return false;
        }
        let mut theta = offset.x.atan2(offset.z);
        let mut phi = (offset.y / radius).clamp(-1.0, 1.0).acos();

        if self.enable_damping {
            theta += self.delta_theta * self.damping_factor;
            phi += self.delta_phi * self.damping_factor;
        } else {
            theta += self.delta_theta;
            phi += self.delta_phi;
        }
        phi = phi.clamp(Self::EPS, PI - Self::EPS);
        let radius = (radius * self.scale).clamp(self.min_distance.max(Self::EPS), self.max_distance);

        let position = camera.target
            + Vec3::new(
                radius * phi.sin() * theta.sin(),
                radius * phi.cos(),
                radius * phi.sin() * theta.cos(),
            );
        let moved = position.distance_squared(camera.position) > Self::EPS;
        camera.position = position;

        if self.enable_damping {
            self.delta_theta *= 1.0 - self.damping_factor;
            self.delta_phi *= 1.0 - self.damping_factor;
        } else {
            self.delta_theta = 0.0;
            self.delta_phi = 0.0;
        }
        self.scale = 1.0;
        moved
    }
}

impl Default for OrbitControls {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_change_requires_reprojection() {
        let mut camera = PerspectiveCamera::default();
        let before = camera.projection();
        camera.set_aspect(16.0 / 9.0);
        assert_eq!(camera.projection(), before);
        camera.update_projection();
        assert_ne!(camera.projection(), before);
    }

    #[test]
    fn centre_ray_points_at_target() {
        let camera = PerspectiveCamera::default();
        let inverse = camera.inverse_view_projection();
        let direction = camera.ray_direction(&inverse, 0.0, 0.0);
        let expected = (camera.target - camera.position).normalize();
        assert!(direction.abs_diff_eq(expected, 1.0e-4), "{direction:?}");
    }

    #[test]
    fn idle_controls_keep_camera_still() {
        let mut camera = PerspectiveCamera::default();
        let start = camera.position;
        let mut controls = OrbitControls::new().with_damping(true, 0.05);
        assert!(!controls.update(&mut camera));
        assert!(camera.position.abs_diff_eq(start, 1.0e-4));
    }

    #[test]
    fn damping_spreads_rotation_over_frames() {
        let mut camera = PerspectiveCamera::default();
        let radius = camera.position.length();
        let mut controls = OrbitControls::new().with_damping(true, 0.05);
        controls.rotate(100.0, 0.0, 600.0);

        assert!(controls.update(&mut camera));
        let first = camera.position;
        assert!(controls.update(&mut camera));
        assert!(!camera.position.abs_diff_eq(first, 1.0e-5));
        assert!((camera.position.length() - radius).abs() < 1.0e-3);
    }

    #[test]
    fn zoom_scales_distance() {
        let mut camera = PerspectiveCamera::default();
        let radius = camera.position.length();
        let mut controls = OrbitControls::new();
        controls.zoom(-1.0);
        controls.update(&mut camera);
        assert!((camera.position.length() - radius * 0.95).abs() < 1.0e-3);
    }
}
