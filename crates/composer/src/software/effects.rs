//! CPU kernels for every effect kind. These mirror the fragment programs the
//! GPU backend generates, pixel centre for pixel centre.

use image::Rgba32FImage;

use super::sample::{fill, sample, Texel};
use crate::params::Uniforms;
use crate::viewport::BufferSize;

pub(crate) const BLOOM_LEVELS: usize = 5;
pub(crate) const BLOOM_KERNEL_RADII: [u32; BLOOM_LEVELS] = [3, 5, 7, 9, 11];
pub(crate) const BLOOM_FACTORS: [f32; BLOOM_LEVELS] = [1.0, 0.8, 0.6, 0.4, 0.2];

const HIGH_PASS_LUMA: [f32; 3] = [0.299, 0.587, 0.114];
const FXAA_LUMA: [f32; 3] = [0.299, 0.587, 0.114];
const FXAA_REDUCE_MIN: f32 = 1.0 / 128.0;
const FXAA_REDUCE_MUL: f32 = 1.0 / 8.0;
const FXAA_SPAN_MAX: f32 = 8.0;

fn dot3(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn rgb(texel: Texel) -> [f32; 3] {
    [texel[0], texel[1], texel[2]]
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn glsl_fract(x: f32) -> f32 {
    x - x.floor()
}

/// The classic `fract(sin(dot(...)) * 43758.5453)` hash.
pub(crate) fn hash(co: [f32; 2]) -> f32 {
    glsl_fract((co[0] * 12.9898 + co[1] * 78.233).sin() * 43758.5453)
}

pub(crate) fn dot_screen(input: &Rgba32FImage, output: &mut Rgba32FImage, uniforms: &Uniforms) {
    let center = uniforms.vec2("center");
    let angle = uniforms.float("angle");
    let scale = uniforms.float("scale");
    let size = uniforms.vec2("tSize");
    let (s, c) = angle.sin_cos();
    fill(output, |uv, _| {
        let color = sample(input, uv);
        let tex = [uv[0] * size[0] - center[0], uv[1] * size[1] - center[1]];
        let point = [
            (c * tex[0] - s * tex[1]) * scale,
            (s * tex[0] + c * tex[1]) * scale,
        ];
        let pattern = point[0].sin() * point[1].sin() * 4.0;
        let average = (color[0] + color[1] + color[2]) / 3.0;
        let grey = average * 10.0 - 5.0 + pattern;
        [grey, grey, grey, color[3]]
    });
}

pub(crate) fn rgb_shift(input: &Rgba32FImage, output: &mut Rgba32FImage, uniforms: &Uniforms) {
    let amount = uniforms.float("amount");
    let angle = uniforms.float("angle");
    let offset = [amount * angle.cos(), amount * angle.sin()];
    fill(output, |uv, _| split_channels(input, uv, offset));
}

fn split_channels(input: &Rgba32FImage, uv: [f32; 2], offset: [f32; 2]) -> Texel {
    let r = sample(input, [uv[0] + offset[0], uv[1] + offset[1]]);
    let ga = sample(input, uv);
    let b = sample(input, [uv[0] - offset[0], uv[1] - offset[1]]);
    [r[0], ga[1], b[2], ga[3]]
}

pub(crate) fn glitch(input: &Rgba32FImage, output: &mut Rgba32FImage, uniforms: &Uniforms) {
    if uniforms.float("byp") > 0.5 {
        fill(output, |uv, _| sample(input, uv));
        return;
    }
    let amount = uniforms.float("amount");
    let angle = uniforms.float("angle");
    let seed = uniforms.float("seed");
    let seed_x = uniforms.float("seed_x");
    let seed_y = uniforms.float("seed_y");
    let distortion_x = uniforms.float("distortion_x");
    let distortion_y = uniforms.float("distortion_y");
    let col_s = uniforms.float("col_s");
    let offset = [amount * angle.cos(), amount * angle.sin()];

    fill(output, |uv, frag| {
        let mut p = uv;
        let xs = (frag[0] / 0.5).floor();
        let ys = (frag[1] / 0.5).floor();
        let disp_uv = [p[0] * seed * seed, p[1] * seed * seed];
        let normal = [hash(disp_uv), hash([disp_uv[0] + 17.0, disp_uv[1] + 31.0])];

        if p[1] < distortion_x + col_s && p[1] > distortion_x - col_s * seed {
            p[1] = if seed_x > 0.0 {
                1.0 - (p[1] + distortion_y)
            } else {
                distortion_y
            };
        }
        if p[0] < distortion_y + col_s && p[0] > distortion_y - col_s * seed {
            p[0] = if seed_y > 0.0 {
                distortion_x
            } else {
                1.0 - (p[0] + distortion_x)
            };
        }
        p[0] += normal[0] * seed_x * (seed / 5.0);
        p[1] += normal[1] * seed_y * (seed / 5.0);

        let mut color = split_channels(input, p, offset);
        let snow = 200.0 * amount * hash([xs * seed, ys * seed * 50.0]) * 0.2;
        for channel in &mut color {
            *channel += snow;
        }
        color
    });
}

pub(crate) fn tint(input: &Rgba32FImage, output: &mut Rgba32FImage, uniforms: &Uniforms) {
    let tint = uniforms.vec3("uTint");
    fill(output, |uv, _| {
        let color = sample(input, uv);
        [
            color[0] + tint[0],
            color[1] + tint[1],
            color[2] + tint[2],
            color[3],
        ]
    });
}

pub(crate) fn normal_displacement(
    input: &Rgba32FImage,
    output: &mut Rgba32FImage,
    uniforms: &Uniforms,
    normal_map: &Rgba32FImage,
) {
    let strength = uniforms.float("uStrength");
    let light = {
        let l = [-1.0f32, 1.0, 0.0];
        let len = dot3(l, l).sqrt();
        [l[0] / len, l[1] / len, l[2] / len]
    };
    fill(output, |uv, _| {
        let encoded = sample(normal_map, uv);
        let normal = [
            encoded[0] * 2.0 - 1.0,
            encoded[1] * 2.0 - 1.0,
            encoded[2] * 2.0 - 1.0,
        ];
        let mut color = sample(
            input,
            [uv[0] + normal[0] * strength, uv[1] + normal[1] * strength],
        );
        let lightness = dot3(normal, light).clamp(0.0, 1.0) * 2.0;
        color[0] += lightness;
        color[1] += lightness;
        color[2] += lightness;
        color
    });
}

pub(crate) fn wave_displacement(
    input: &Rgba32FImage,
    output: &mut Rgba32FImage,
    uniforms: &Uniforms,
) {
    let time = uniforms.float("uTime");
    let amplitude = uniforms.float("uAmplitude");
    let frequency = uniforms.float("uFrequency");
    fill(output, |uv, _| {
        let shifted = uv[1] + (uv[0] * frequency + time).sin() * amplitude;
        sample(input, [uv[0], shifted])
    });
}

/// Linear to sRGB transfer on colour channels; alpha untouched.
pub fn linear_to_srgb(value: f32) -> f32 {
    if value <= 0.003_130_8 {
        value * 12.92
    } else {
        value.powf(0.41666) * 1.055 - 0.055
    }
}

pub(crate) fn color_correction(input: &Rgba32FImage, output: &mut Rgba32FImage) {
    fill(output, |uv, _| {
        let color = sample(input, uv);
        [
            linear_to_srgb(color[0]),
            linear_to_srgb(color[1]),
            linear_to_srgb(color[2]),
            color[3],
        ]
    });
}

pub(crate) fn fxaa(input: &Rgba32FImage, output: &mut Rgba32FImage) {
    let (width, height) = input.dimensions();
    let texel = [1.0 / width.max(1) as f32, 1.0 / height.max(1) as f32];
    let at = |uv: [f32; 2], dx: f32, dy: f32| sample(input, [uv[0] + dx * texel[0], uv[1] + dy * texel[1]]);

    fill(output, |uv, _| {
        let nw = at(uv, -1.0, -1.0);
        let ne = at(uv, 1.0, -1.0);
        let sw = at(uv, -1.0, 1.0);
        let se = at(uv, 1.0, 1.0);
        let m = at(uv, 0.0, 0.0);

        let luma_nw = dot3(rgb(nw), FXAA_LUMA);
        let luma_ne = dot3(rgb(ne), FXAA_LUMA);
        let luma_sw = dot3(rgb(sw), FXAA_LUMA);
        let luma_se = dot3(rgb(se), FXAA_LUMA);
        let luma_m = dot3(rgb(m), FXAA_LUMA);
        let luma_min = luma_m.min(luma_nw.min(luma_ne).min(luma_sw.min(luma_se)));
        let luma_max = luma_m.max(luma_nw.max(luma_ne).max(luma_sw.max(luma_se)));

        let dir = [
            -((luma_nw + luma_ne) - (luma_sw + luma_se)),
            (luma_nw + luma_sw) - (luma_ne + luma_se),
        ];
        let reduce = ((luma_nw + luma_ne + luma_sw + luma_se) * (0.25 * FXAA_REDUCE_MUL))
            .max(FXAA_REDUCE_MIN);
        let rcp_min = 1.0 / (dir[0].abs().min(dir[1].abs()) + reduce);
        let dir = [
            (dir[0] * rcp_min).clamp(-FXAA_SPAN_MAX, FXAA_SPAN_MAX) * texel[0],
            (dir[1] * rcp_min).clamp(-FXAA_SPAN_MAX, FXAA_SPAN_MAX) * texel[1],
        ];

        let tap = |t: f32| sample(input, [uv[0] + dir[0] * t, uv[1] + dir[1] * t]);
        let (a0, a1) = (tap(1.0 / 3.0 - 0.5), tap(2.0 / 3.0 - 0.5));
        let (b0, b1) = (tap(-0.5), tap(0.5));
        let rgb_a: [f32; 3] = std::array::from_fn(|i| 0.5 * (a0[i] + a1[i]));
        let rgb_b: [f32; 3] = std::array::from_fn(|i| rgb_a[i] * 0.5 + 0.25 * (b0[i] + b1[i]));
        let luma_b = dot3(rgb_b, FXAA_LUMA);
        let chosen = if luma_b < luma_min || luma_b > luma_max {
            rgb_a
        } else {
            rgb_b
        };
        [chosen[0], chosen[1], chosen[2], m[3]]
    });
}

/// Downscaled buffers owned by one bloom stage.
pub(crate) struct BloomChain {
    pub bright: Rgba32FImage,
    pub horizontal: Vec<Rgba32FImage>,
    pub vertical: Vec<Rgba32FImage>,
}

impl BloomChain {
    pub fn new(size: BufferSize) -> Self {
        let level = |index: usize| {
            let mip = size.mip(index as u32);
            Rgba32FImage::new(mip.width, mip.height)
        };
        Self {
            bright: level(0),
            horizontal: (0..BLOOM_LEVELS).map(level).collect(),
            vertical: (0..BLOOM_LEVELS).map(level).collect(),
        }
    }
}

pub(crate) fn gaussian_pdf(x: f32, sigma: f32) -> f32 {
    0.39894 * (-0.5 * x * x / (sigma * sigma)).exp() / sigma
}

fn separable_blur(
    input: &Rgba32FImage,
    output: &mut Rgba32FImage,
    radius: u32,
    direction: [f32; 2],
) {
    let (width, height) = output.dimensions();
    let inv_size = [1.0 / width as f32, 1.0 / height as f32];
    let sigma = radius as f32;
    let weights: Vec<f32> = (0..radius).map(|i| gaussian_pdf(i as f32, sigma)).collect();
    fill(output, |uv, _| {
        let mut weight_sum = weights[0];
        let centre = sample(input, uv);
        let mut sum = [
            centre[0] * weight_sum,
            centre[1] * weight_sum,
            centre[2] * weight_sum,
        ];
        for (i, weight) in weights.iter().enumerate().skip(1) {
            let x = i as f32;
            let offset = [direction[0] * inv_size[0] * x, direction[1] * inv_size[1] * x];
            let a = sample(input, [uv[0] + offset[0], uv[1] + offset[1]]);
            let b = sample(input, [uv[0] - offset[0], uv[1] - offset[1]]);
            for c in 0..3 {
                sum[c] += (a[c] + b[c]) * weight;
            }
            weight_sum += 2.0 * weight;
        }
        [
            sum[0] / weight_sum,
            sum[1] / weight_sum,
            sum[2] / weight_sum,
            1.0,
        ]
    });
}

pub(crate) fn lerp_bloom_factor(factor: f32, radius: f32) -> f32 {
    let mirror = 1.2 - factor;
    factor + (mirror - factor) * radius
}

pub(crate) fn bloom(
    input: &Rgba32FImage,
    output: &mut Rgba32FImage,
    uniforms: &Uniforms,
    chain: &mut BloomChain,
) {
    let strength = uniforms.float("strength");
    let radius = uniforms.float("radius");
    let threshold = uniforms.float("threshold");
    let smooth_width = uniforms.float("smoothWidth");

    fill(&mut chain.bright, |uv, _| {
        let texel = sample(input, uv);
        let alpha = smoothstep(threshold, threshold + smooth_width, dot3(rgb(texel), HIGH_PASS_LUMA));
        [texel[0] * alpha, texel[1] * alpha, texel[2] * alpha, texel[3] * alpha]
    });

    for level in 0..BLOOM_LEVELS {
        let kernel = BLOOM_KERNEL_RADII[level];
        let source = if level == 0 {
            &chain.bright
        } else {
            &chain.vertical[level - 1]
        };
        separable_blur(source, &mut chain.horizontal[level], kernel, [1.0, 0.0]);
        let (horizontal, vertical) = (&chain.horizontal[level], &mut chain.vertical[level]);
        separable_blur(horizontal, vertical, kernel, [0.0, 1.0]);
    }

    // The first horizontal target doubles as the composite buffer.
    let weights: [f32; BLOOM_LEVELS] =
        std::array::from_fn(|i| strength * lerp_bloom_factor(BLOOM_FACTORS[i], radius));
    let (composite, vertical) = (&mut chain.horizontal[0], &chain.vertical);
    fill(composite, |uv, _| {
        let mut sum = [0.0f32; 4];
        for (mip, weight) in vertical.iter().zip(weights) {
            let texel = sample(mip, uv);
            for c in 0..4 {
                sum[c] += texel[c] * weight;
            }
        }
        sum
    });

    let composite = &chain.horizontal[0];
    fill(output, |uv, _| {
        let base = sample(input, uv);
        let glow = sample(composite, uv);
        [base[0] + glow[0], base[1] + glow[1], base[2] + glow[2], base[3]]
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::UniformValue;
    use image::Rgba;

    fn flat(size: u32, value: Texel) -> Rgba32FImage {
        Rgba32FImage::from_pixel(size, size, Rgba(value))
    }

    #[test]
    fn srgb_transfer_hits_reference_points() {
        assert_eq!(linear_to_srgb(0.0), 0.0);
        assert!((linear_to_srgb(1.0) - 1.0).abs() < 1.0e-3);
        assert!((linear_to_srgb(0.2158) - 0.502).abs() < 2.0e-3);
    }

    #[test]
    fn tint_adds_offset() {
        let input = flat(4, [0.2, 0.2, 0.2, 1.0]);
        let mut output = flat(4, [0.0; 4]);
        let uniforms = Uniforms::new().with("uTint", UniformValue::Vec3([0.1, -0.1, 0.0]));
        tint(&input, &mut output, &uniforms);
        let texel = output.get_pixel(1, 1).0;
        assert!((texel[0] - 0.3).abs() < 1.0e-6);
        assert!((texel[1] - 0.1).abs() < 1.0e-6);
        assert_eq!(texel[3], 1.0);
    }

    #[test]
    fn bloom_leaves_dark_frames_untouched() {
        let input = flat(32, [0.1, 0.1, 0.1, 1.0]);
        let mut output = flat(32, [0.0; 4]);
        let mut chain = BloomChain::new(BufferSize::new(32, 32));
        let stage = crate::stage::Stage::bloom();
        bloom(&input, &mut output, stage.uniforms(), &mut chain);
        assert_eq!(output.get_pixel(5, 5).0, [0.1, 0.1, 0.1, 1.0]);
    }

    #[test]
    fn bloom_brightens_highlights() {
        let input = flat(32, [2.0, 2.0, 2.0, 1.0]);
        let mut output = flat(32, [0.0; 4]);
        let mut chain = BloomChain::new(BufferSize::new(32, 32));
        let stage = crate::stage::Stage::bloom();
        bloom(&input, &mut output, stage.uniforms(), &mut chain);
        assert!(output.get_pixel(16, 16).0[0] > 2.0);
    }

    #[test]
    fn bloom_factor_mirrors_with_radius() {
        assert_eq!(lerp_bloom_factor(1.0, 0.0), 1.0);
        assert!((lerp_bloom_factor(1.0, 1.0) - 0.2).abs() < 1.0e-6);
        assert!((lerp_bloom_factor(0.2, 1.0) - 1.0).abs() < 1.0e-6);
    }

    #[test]
    fn fxaa_preserves_flat_regions() {
        let input = flat(8, [0.5, 0.25, 0.75, 1.0]);
        let mut output = flat(8, [0.0; 4]);
        fxaa(&input, &mut output);
        let texel = output.get_pixel(3, 3).0;
        for (got, want) in texel.iter().zip([0.5, 0.25, 0.75, 1.0]) {
            assert!((got - want).abs() < 1.0e-5);
        }
    }

    #[test]
    fn glitch_bypass_copies_input() {
        let input = flat(4, [0.3, 0.6, 0.9, 1.0]);
        let mut output = flat(4, [0.0; 4]);
        let uniforms = Uniforms::new().with("byp", UniformValue::Float(1.0));
        glitch(&input, &mut output, &uniforms);
        assert_eq!(output, input);
    }
}
