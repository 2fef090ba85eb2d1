use image::{Rgba, Rgba32FImage};

pub(crate) type Texel = [f32; 4];

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddressMode {
    ClampToEdge,
    /// Repeat horizontally, clamp vertically (equirectangular maps).
    RepeatU,
}

/// Bilinear lookup with texel centres at `(i + 0.5) / size`.
pub(crate) fn bilinear(image: &Rgba32FImage, u: f32, v: f32, mode: AddressMode) -> Texel {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return [0.0; 4];
    }
    let x = snap(u * width as f32 - 0.5);
    let y = snap(v * height as f32 - 0.5);
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let column = |index: f32| -> u32 {
        let index = index as i64;
        match mode {
            AddressMode::ClampToEdge => index.clamp(0, width as i64 - 1) as u32,
            AddressMode::RepeatU => index.rem_euclid(width as i64) as u32,
        }
    };
    let row = |index: f32| -> u32 { (index as i64).clamp(0, height as i64 - 1) as u32 };

    let (c0, c1) = (column(x0), column(x0 + 1.0));
    let (r0, r1) = (row(y0), row(y0 + 1.0));
    let top = lerp4(image.get_pixel(c0, r0).0, image.get_pixel(c1, r0).0, fx);
    let bottom = lerp4(image.get_pixel(c0, r1).0, image.get_pixel(c1, r1).0, fx);
    lerp4(top, bottom, fy)
}

/// Pulls coordinates that land within rounding error of a texel centre onto it.
fn snap(coord: f32) -> f32 {
    let nearest = coord.round();
    if (coord - nearest).abs() < 1.0e-3 {
        nearest
    } else {
        coord
    }
}

pub(crate) fn sample(image: &Rgba32FImage, uv: [f32; 2]) -> Texel {
    bilinear(image, uv[0], uv[1], AddressMode::ClampToEdge)
}

pub(crate) fn lerp4(a: Texel, b: Texel, t: f32) -> Texel {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
        a[3] + (b[3] - a[3]) * t,
    ]
}

/// Runs `shade` for every pixel centre of `target`, passing its uv.
pub(crate) fn fill<F>(target: &mut Rgba32FImage, mut shade: F)
where
    F: FnMut([f32; 2], [f32; 2]) -> Texel,
{
    let (width, height) = target.dimensions();
    for (x, y, pixel) in target.enumerate_pixels_mut() {
        let frag = [x as f32 + 0.5, y as f32 + 0.5];
        let uv = [frag[0] / width as f32, frag[1] / height as f32];
        *pixel = Rgba(shade(uv, frag));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Rgba32FImage {
        let mut image = Rgba32FImage::new(2, 1);
        image.put_pixel(0, 0, Rgba([0.0, 0.0, 0.0, 1.0]));
        image.put_pixel(1, 0, Rgba([1.0, 1.0, 1.0, 1.0]));
        image
    }

    #[test]
    fn texel_centres_are_exact() {
        let image = ramp();
        assert_eq!(sample(&image, [0.25, 0.5])[0], 0.0);
        assert_eq!(sample(&image, [0.75, 0.5])[0], 1.0);
        assert_eq!(sample(&image, [0.5, 0.5])[0], 0.5);
    }

    #[test]
    fn clamp_and_repeat_differ_at_the_seam() {
        let image = ramp();
        assert_eq!(bilinear(&image, 0.0, 0.5, AddressMode::ClampToEdge)[0], 0.0);
        assert_eq!(bilinear(&image, 0.0, 0.5, AddressMode::RepeatU)[0], 0.5);
    }
}
