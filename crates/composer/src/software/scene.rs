use std::f32::consts::PI;

use glam::{Mat3, Vec3};
use image::Rgba32FImage;

use super::sample::{bilinear, fill, AddressMode};
use crate::backend::FrameInputs;
use crate::scene::{equirect_uv, ToneMapping};

const ACES_INPUT: Mat3 = Mat3::from_cols(
    Vec3::new(0.59719, 0.07600, 0.02840),
    Vec3::new(0.35458, 0.90834, 0.13383),
    Vec3::new(0.04823, 0.01566, 0.83777),
);

const ACES_OUTPUT: Mat3 = Mat3::from_cols(
    Vec3::new(1.60475, -0.10208, -0.00327),
    Vec3::new(-0.53108, 1.10813, -0.07276),
    Vec3::new(-0.07367, -0.00605, 1.07602),
);

fn rrt_and_odt_fit(v: Vec3) -> Vec3 {
    let a = v * (v + 0.0245786) - 0.000090537;
    let b = v * (0.983729 * v + 0.4329510) + 0.238081;
    a / b
}

pub(crate) fn aces_filmic(color: Vec3, exposure: f32) -> Vec3 {
    let color = ACES_INPUT * (color * exposure / 0.6);
    let color = ACES_OUTPUT * rrt_and_odt_fit(color);
    color.clamp(Vec3::ZERO, Vec3::ONE)
}

fn tone_map(color: Vec3, mode: ToneMapping, exposure: f32) -> Vec3 {
    match mode {
        ToneMapping::None => color,
        ToneMapping::AcesFilmic => aces_filmic(color, exposure),
    }
}

/// Ray-casts the scene spheres, lights them and draws the environment behind.
pub(crate) fn render(
    target: &mut Rgba32FImage,
    inputs: &FrameInputs<'_>,
    environment: Option<&Rgba32FImage>,
) {
    let scene = inputs.scene;
    let camera = inputs.camera;
    let inverse = camera.inverse_view_projection();
    let light_dir = scene.light.direction();
    let light = Vec3::from(scene.light.color) * scene.light.intensity;
    let env = |direction: Vec3| -> Vec3 {
        match environment {
            Some(map) => {
                let [u, v] = equirect_uv(direction);
                let texel = bilinear(map, u, v, AddressMode::RepeatU);
                Vec3::new(texel[0], texel[1], texel[2])
            }
            None => Vec3::ZERO,
        }
    };

    fill(target, |uv, _| {
        let ndc_x = uv[0] * 2.0 - 1.0;
        let ndc_y = 1.0 - uv[1] * 2.0;
        let direction = camera.ray_direction(&inverse, ndc_x, ndc_y);

        let color = match scene.trace(camera.position, direction) {
            Some((t, sphere)) => {
                let point = camera.position + direction * t;
                let normal = (point - sphere.center).normalize_or_zero();
                let view = -direction;
                let base = Vec3::from(sphere.color);
                let diffuse = base * (1.0 - sphere.metalness);
                let f0 = Vec3::splat(0.04).lerp(base, sphere.metalness);

                let n_dot_l = normal.dot(light_dir).max(0.0);
                let half = (light_dir + view).normalize_or_zero();
                let shininess = (2.0 / sphere.roughness.max(0.05).powi(4) - 2.0).max(1.0);
                let specular = f0
                    * normal.dot(half).max(0.0).powf(shininess)
                    * ((shininess + 2.0) / (8.0 * PI));
                let direct = (diffuse / PI + specular) * light * n_dot_l;

                let n_dot_v = normal.dot(view).clamp(0.0, 1.0);
                let fresnel = f0 + (Vec3::ONE - f0) * (1.0 - n_dot_v).powi(5);
                let reflected = direction - 2.0 * direction.dot(normal) * normal;
                let ambient = diffuse * env(normal)
                    + fresnel * env(reflected) * (1.0 - sphere.roughness);
                direct + ambient * scene.environment_intensity
            }
            None if environment.is_some() => env(direction),
            None => Vec3::from(scene.clear_color),
        };

        let mapped = tone_map(color, scene.tone_mapping, scene.exposure);
        [mapped.x, mapped.y, mapped.z, 1.0]
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aces_maps_black_to_black_and_saturates() {
        assert!(aces_filmic(Vec3::ZERO, 1.0).max_element() < 1.0e-3);
        let bright = aces_filmic(Vec3::splat(100.0), 1.0);
        assert!(bright.min_element() > 0.95);
        assert!(bright.max_element() <= 1.0);
    }

    #[test]
    fn aces_is_monotonic_in_exposure() {
        let grey = Vec3::splat(0.18);
        assert!(aces_filmic(grey, 2.0).x > aces_filmic(grey, 1.0).x);
    }
}
