//! Upsample the scattering result and blend it over the source image.

use rayon::prelude::*;

use crate::core::types::{Vec3, Vec4};
use crate::core::ComputeBackend;
use crate::render::evaluator::ScatterOutput;
use crate::render::frame::ColorImage;

/// `final = mix(src, src * T + L, blend)` per pixel, alpha kept from the source.
///
/// A scatter result smaller than the source is bilinearly upsampled.
pub fn composite(
    source: &ColorImage,
    scatter: &ScatterOutput,
    blend_factor: f32,
    backend: &ComputeBackend,
) -> ColorImage {
    let width = source.width();
    let height = source.height();
    if width == 0 || height == 0 {
        return source.clone();
    }

    let blend = blend_factor.clamp(0.0, 1.0);
    let same_size = scatter.width() == width && scatter.height() == height;
    let src = source.pixels();
    let mut pixels = vec![Vec4::ZERO; src.len()];

    backend.dispatch(|| {
        pixels
            .par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                let v = (y as f32 + 0.5) / height as f32;
                for (x, out) in row.iter_mut().enumerate() {
                    let (radiance, transmittance) = if same_size {
                        scatter.get(x as u32, y as u32)
                    } else {
                        let u = (x as f32 + 0.5) / width as f32;
                        scatter.sample_bilinear(u, v)
                    };
                    let s = src[y * width as usize + x];
                    *out = blend_pixel(s, radiance, transmittance, blend);
                }
            });
    });

    ColorImage::new(width, height, pixels).unwrap_or_else(|_| source.clone())
}

#[inline]
fn blend_pixel(src: Vec4, radiance: Vec3, transmittance: f32, blend: f32) -> Vec4 {
    let rgb = src.truncate();
    let lit = rgb * transmittance.clamp(0.0, 1.0) + radiance.max(Vec3::ZERO);
    rgb.lerp(lit, blend).extend(src.w)
}
