//! CPU shadow slices.
//!
//! A [`ShadowImage`] is the CPU twin of one GPU slice: square, RGBA f32
//! texels, clamp-to-edge addressing. Tests, benchmarks and the sampler's
//! reference path use it to run the filter and decode math without a GPU.

use glam::Vec4;

use crate::settings::ShadowTechnique;
use crate::technique::{TechniqueParams, encode};

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowImage {
    size: u32,
    texels: Vec<Vec4>,
}

impl ShadowImage {
    /// Square image of `size` texels per side, every texel `fill`.
    pub fn new(size: u32, fill: Vec4) -> Self {
        let size = size.max(1);
        Self {
            size,
            texels: vec![fill; (size * size) as usize],
        }
    }

    /// Encode a depth field with `technique`.
    pub fn from_depths<F>(technique: ShadowTechnique, params: &TechniqueParams, size: u32, depth: F) -> Self
    where
        F: Fn(u32, u32) -> f32,
    {
        let size = size.max(1);
        let mut texels = Vec::with_capacity((size * size) as usize);
        for y in 0..size {
            for x in 0..size {
                texels.push(encode(technique, params, depth(x, y)));
            }
        }
        Self { size, texels }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Texel at `(x, y)`, clamped to the edge.
    pub fn get(&self, x: i32, y: i32) -> Vec4 {
        let max = self.size as i32 - 1;
        let x = x.clamp(0, max) as u32;
        let y = y.clamp(0, max) as u32;
        self.texels[(y * self.size + x) as usize]
    }

    /// Overwrite `(x, y)`; out-of-range writes are ignored.
    pub fn set(&mut self, x: u32, y: u32, value: Vec4) {
        if x < self.size && y < self.size {
            self.texels[(y * self.size + x) as usize] = value;
        }
    }

    pub fn texels(&self) -> &[Vec4] {
        &self.texels
    }

    /// Bilinear sample at texel-space position `(fx, fy)`, where texel
    /// centers sit at half-integers.
    pub fn sample_bilinear(&self, fx: f32, fy: f32) -> Vec4 {
        let px = fx - 0.5;
        let py = fy - 0.5;
        let x0 = px.floor();
        let y0 = py.floor();
        let tx = px - x0;
        let ty = py - y0;
        let (x0, y0) = (x0 as i32, y0 as i32);
        let top = self.get(x0, y0).lerp(self.get(x0 + 1, y0), tx);
        let bottom = self.get(x0, y0 + 1).lerp(self.get(x0 + 1, y0 + 1), tx);
        top.lerp(bottom, ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_clamped_reads() {
        let mut image = ShadowImage::new(4, Vec4::ZERO);
        image.set(0, 0, Vec4::ONE);
        image.set(3, 3, Vec4::splat(2.0));
        assert_eq!(image.get(-5, -1), Vec4::ONE);
        assert_eq!(image.get(10, 10), Vec4::splat(2.0));
        image.set(4, 0, Vec4::splat(9.0));
        assert!(image.texels().iter().all(|t| t.x != 9.0));
    }

    #[test]
    fn test_bilinear_at_texel_center_is_exact() {
        let image = ShadowImage::from_depths(ShadowTechnique::DepthOnly, &TechniqueParams::default(), 8, |x, y| {
            (x + y * 8) as f32 / 64.0
        });
        let v = image.sample_bilinear(2.5, 3.5);
        assert!((v.x - (2 + 3 * 8) as f32 / 64.0).abs() < 1e-6);
        let mid = image.sample_bilinear(3.0, 3.5);
        let expected = ((2 + 24) as f32 + (3 + 24) as f32) / 2.0 / 64.0;
        assert!((mid.x - expected).abs() < 1e-6);
    }
}
