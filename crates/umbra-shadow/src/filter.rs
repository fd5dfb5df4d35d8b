//! Separable Gaussian prefiltering of encoded shadow slices.
//!
//! The GPU blur in `umbra-render` uploads [`GaussianKernel::packed`] and runs
//! the same two passes; the CPU versions here are the reference.

use glam::Vec4;

use crate::image::ShadowImage;
use crate::settings::BlurDomain;

/// Largest supported kernel width.
pub const MAX_KERNEL_SIZE: u32 = 15;

/// Normalized 1D Gaussian weights of odd width.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    weights: Vec<f32>,
    sigma: f32,
}

impl GaussianKernel {
    /// Kernel of `size` taps (forced odd, 3 to 15) with standard deviation
    /// `sigma` texels. Weights sum to 1.
    pub fn new(size: u32, sigma: f32) -> Self {
        let size = size.clamp(3, MAX_KERNEL_SIZE) | 1;
        let sigma = if sigma.is_finite() { sigma.max(0.05) } else { 1.0 };
        let radius = (size / 2) as i32;
        let raw: Vec<f32> = (-radius..=radius)
            .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
            .collect();
        let sum: f32 = raw.iter().sum();
        Self {
            weights: raw.into_iter().map(|w| w / sum).collect(),
            sigma,
        }
    }

    pub fn radius(&self) -> usize {
        self.weights.len() / 2
    }

    pub fn sigma(&self) -> f32 {
        self.sigma
    }

    /// All `2r + 1` weights, left to right.
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Weights for offsets `0..=r`, packed four per vec4 for the GPU.
    pub fn packed(&self) -> [[f32; 4]; 2] {
        let mut out = [[0.0; 4]; 2];
        let r = self.radius();
        for (offset, w) in self.weights[r..].iter().enumerate() {
            out[offset / 4][offset % 4] = *w;
        }
        out
    }
}

/// Horizontal then vertical blur.
pub fn blur_separable(image: &ShadowImage, kernel: &GaussianKernel, domain: BlurDomain) -> ShadowImage {
    let horizontal = blur_pass(image, kernel, domain, (1, 0));
    blur_pass(&horizontal, kernel, domain, (0, 1))
}

/// One directional blur pass with clamp-to-edge addressing.
pub fn blur_pass(
    image: &ShadowImage,
    kernel: &GaussianKernel,
    domain: BlurDomain,
    direction: (i32, i32),
) -> ShadowImage {
    let size = image.size();
    let r = kernel.radius() as i32;
    let mut out = ShadowImage::new(size, Vec4::ZERO);
    for y in 0..size as i32 {
        for x in 0..size as i32 {
            let taps = (-r..=r).map(|i| {
                let w = kernel.weights()[(i + r) as usize];
                (w, image.get(x + i * direction.0, y + i * direction.1))
            });
            let value = match domain {
                BlurDomain::Linear => taps.fold(Vec4::ZERO, |acc, (w, t)| acc + t * w),
                BlurDomain::Log => Vec4::new(log_sum_exp(taps.map(|(w, t)| (w, t.x))), 0.0, 0.0, 0.0),
            };
            out.set(x as u32, y as u32, value);
        }
    }
    out
}

/// `ln(sum(w_i * exp(x_i)))`, shifted by the largest `x_i` so no term
/// overflows.
pub fn log_sum_exp<I>(terms: I) -> f32
where
    I: Iterator<Item = (f32, f32)> + Clone,
{
    let max = terms.clone().fold(f32::NEG_INFINITY, |m, (_, x)| m.max(x));
    if !max.is_finite() {
        return max;
    }
    let sum: f32 = terms.map(|(w, x)| w * (x - max).exp()).sum();
    max + sum.ln()
}

/// Next mip level: each texel averages a 2×2 block in the given domain.
pub fn downsample(image: &ShadowImage, domain: BlurDomain) -> ShadowImage {
    let size = (image.size() / 2).max(1);
    let mut out = ShadowImage::new(size, Vec4::ZERO);
    for y in 0..size as i32 {
        for x in 0..size as i32 {
            let block = [
                image.get(2 * x, 2 * y),
                image.get(2 * x + 1, 2 * y),
                image.get(2 * x, 2 * y + 1),
                image.get(2 * x + 1, 2 * y + 1),
            ];
            let value = match domain {
                BlurDomain::Linear => block.iter().fold(Vec4::ZERO, |acc, t| acc + *t) * 0.25,
                BlurDomain::Log => Vec4::new(log_sum_exp(block.iter().map(|t| (0.25, t.x))), 0.0, 0.0, 0.0),
            };
            out.set(x as u32, y as u32, value);
        }
    }
    out
}
