//! GPU-side shadow uniform read by the shading pass.

use bytemuck::{Pod, Zeroable};

use crate::cascade::CascadeSet;
use crate::settings::{DepthBias, MAX_CASCADES, ShadowSettings};

/// Shadow sampling parameters, bound by the consumer's fragment shader.
///
/// Layout matches `ShadowUniform` in the WGSL sampling library.
/// Total size: 64 + 2×128 + 48 + 4×16 = 432 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ShadowUniform {
    /// World-to-light-view matrix shared by all cascades.
    pub light_view: [[f32; 4]; 4],
    /// Per-cascade light-view to (u, v, depth) scale; w unused.
    pub cascade_scale: [[f32; 4]; MAX_CASCADES],
    /// Per-cascade light-view to (u, v, depth) offset; w unused.
    pub cascade_offset: [[f32; 4]; MAX_CASCADES],
    /// Partition boundaries, packed four per vec4 (N + 1 used).
    pub boundaries: [[f32; 4]; 3],
    /// technique, cascade count, selection policy, PCF kernel width.
    pub config: [u32; 4],
    /// blend fraction, bias constant, bias slope scale, bias max.
    pub blend_bias: [f32; 4],
    /// light-bleeding reduction, ESM exponent, EVSM positive and negative
    /// exponents.
    pub decode: [f32; 4],
    /// resolution, minimum variance, debug tint flag, gradient bias flag.
    pub misc: [f32; 4],
}

impl ShadowUniform {
    /// Pack cascades and sampling settings.
    pub fn new(cascades: &CascadeSet, settings: &ShadowSettings) -> Self {
        let settings = settings.sanitized();
        let mut uniform = Self::zeroed();
        uniform.light_view = cascades.light_view().to_cols_array_2d();

        for cascade in cascades.iter().take(MAX_CASCADES) {
            uniform.cascade_scale[cascade.index] = cascade.uv_scale.extend(0.0).to_array();
            uniform.cascade_offset[cascade.index] = cascade.uv_offset.extend(0.0).to_array();
        }
        for (i, b) in cascades.partition().boundaries().iter().enumerate() {
            uniform.boundaries[i / 4][i % 4] = *b;
        }

        uniform.config = [
            settings.technique.as_u32(),
            cascades.len() as u32,
            settings.selection.as_u32(),
            settings.pcf_kernel,
        ];
        let (constant, slope_scale, max) = match settings.depth_bias {
            DepthBias::Flat { bias } => (bias, 0.0, bias),
            DepthBias::Gradient {
                constant,
                slope_scale,
                max,
            } => (constant, slope_scale, max),
        };
        uniform.blend_bias = [settings.blend_fraction, constant, slope_scale, max];
        uniform.decode = [
            settings.light_bleeding_reduction,
            settings.esm_exponent,
            settings.evsm_positive_exponent,
            settings.evsm_negative_exponent,
        ];
        uniform.misc = [
            cascades.resolution() as f32,
            settings.min_variance,
            if settings.debug_tint { 1.0 } else { 0.0 },
            if settings.depth_bias.is_gradient() { 1.0 } else { 0.0 },
        ];
        uniform
    }

    /// Boundary `i` of the packed partition.
    pub fn boundary(&self, i: usize) -> f32 {
        self.boundaries[i / 4][i % 4]
    }
}
