//! Operator-facing shadow settings.
//!
//! Every knob is a plain scalar or enum. Out-of-range values are never an
//! error: [`ShadowSettings::sanitized`] clamps them into the supported range,
//! trading visual quality for robustness.

use serde::{Deserialize, Serialize};

/// Maximum number of cascades a [`ShadowSettings`] may request.
pub const MAX_CASCADES: usize = 8;

/// Smallest and largest supported slice resolution.
pub const MIN_RESOLUTION: u32 = 16;
pub const MAX_RESOLUTION: u32 = 8192;

/// Shadow encoding stored in each slice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShadowTechnique {
    /// Raw depth compared at shading time, softened with PCF.
    #[default]
    DepthOnly,
    /// Variance shadow map: (d, d^2).
    Vsm,
    /// Exponential shadow map: exp(c * d).
    ///
    /// Slices hold the exponent `c * d` rather than `exp(c * d)`, and the
    /// blur and mip passes combine texels with log-sum-exp. Code reading
    /// the array directly takes `exp` of the stored value.
    Esm,
    /// Exponential variance, positive warp only.
    Evsm2,
    /// Exponential variance, positive and negative warps.
    Evsm4,
}

impl ShadowTechnique {
    /// All techniques, in jump-table order.
    pub const ALL: [ShadowTechnique; 5] = [
        ShadowTechnique::DepthOnly,
        ShadowTechnique::Vsm,
        ShadowTechnique::Esm,
        ShadowTechnique::Evsm2,
        ShadowTechnique::Evsm4,
    ];

    /// Index into per-technique tables.
    pub const fn index(self) -> usize {
        match self {
            ShadowTechnique::DepthOnly => 0,
            ShadowTechnique::Vsm => 1,
            ShadowTechnique::Esm => 2,
            ShadowTechnique::Evsm2 => 3,
            ShadowTechnique::Evsm4 => 4,
        }
    }

    /// Identifier written to GPU uniforms.
    pub const fn as_u32(self) -> u32 {
        self.index() as u32
    }

    /// Whether slices hold filterable statistics instead of raw depth.
    pub const fn uses_moments(self) -> bool {
        !matches!(self, ShadowTechnique::DepthOnly)
    }

    /// Number of meaningful channels in an encoded texel.
    pub const fn channel_count(self) -> u32 {
        match self {
            ShadowTechnique::DepthOnly | ShadowTechnique::Esm => 1,
            ShadowTechnique::Vsm | ShadowTechnique::Evsm2 => 2,
            ShadowTechnique::Evsm4 => 4,
        }
    }

    /// How slices of this technique are blurred, `None` when they are not.
    pub const fn blur_domain(self) -> Option<BlurDomain> {
        match self {
            ShadowTechnique::DepthOnly => None,
            ShadowTechnique::Esm => Some(BlurDomain::Log),
            ShadowTechnique::Vsm | ShadowTechnique::Evsm2 | ShadowTechnique::Evsm4 => {
                Some(BlurDomain::Linear)
            }
        }
    }
}

/// Arithmetic domain used when filtering encoded texels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlurDomain {
    /// Weighted sum of the stored values.
    Linear,
    /// Weighted log-sum-exp of values stored as logarithms.
    Log,
}

/// Policy for the light-space depth range of each cascade.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NearFarFit {
    /// Fixed light-view depth range [0, 1]. Debug only.
    ZeroOne,
    /// The cascade's own corner box.
    CascadeAabb,
    /// The whole scene box projected into light space.
    SceneAabb,
    /// The scene box clipped to the cascade's light-space window.
    #[default]
    SceneIntersection,
}

/// Which part of the view frustum a cascade's X/Y window must cover.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum XyFit {
    /// Only the cascade's own depth interval.
    #[default]
    Cascade,
    /// Everything from the viewer's near plane to the cascade's far boundary.
    Scene,
}

/// How the shading pass picks the cascade for a pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CascadeSelection {
    /// Ordered interval test, first match wins.
    #[default]
    Map,
    /// Count of partition boundaries below the pixel depth.
    Interval,
}

impl CascadeSelection {
    pub const fn as_u32(self) -> u32 {
        match self {
            CascadeSelection::Map => 0,
            CascadeSelection::Interval => 1,
        }
    }
}

/// Receiver depth bias for depth comparisons.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum DepthBias {
    /// Constant offset in normalized shadow depth.
    Flat { bias: f32 },
    /// Constant plus a term proportional to the receiver's depth slope per
    /// shadow texel, clamped to `max`.
    Gradient {
        constant: f32,
        slope_scale: f32,
        max: f32,
    },
}

impl Default for DepthBias {
    fn default() -> Self {
        DepthBias::Flat { bias: 0.002 }
    }
}

impl DepthBias {
    /// Bias for a receiver whose depth changes by `slope` per shadow texel.
    pub fn resolve(&self, slope: f32) -> f32 {
        match *self {
            DepthBias::Flat { bias } => bias,
            DepthBias::Gradient {
                constant,
                slope_scale,
                max,
            } => (constant + slope_scale * slope.abs()).min(max),
        }
    }

    pub fn is_gradient(&self) -> bool {
        matches!(self, DepthBias::Gradient { .. })
    }
}

/// Complete shadow configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShadowSettings {
    /// Encoding stored in the slices.
    pub technique: ShadowTechnique,
    /// Number of cascades, 1 to 8.
    pub cascade_count: u32,
    /// Slice width and height in texels, a power of two.
    pub resolution: u32,
    /// Far boundary of each cascade as a fraction of the viewer depth range.
    pub split_percentages: Vec<f32>,
    /// Fraction of a cascade, measured back from its far boundary, that is
    /// blended with the next cascade.
    pub blend_fraction: f32,
    /// PCF box kernel width for depth-only shadows (1, 3, 5 or 7).
    pub pcf_kernel: u32,
    /// Receiver depth bias for depth-only shadows.
    pub depth_bias: DepthBias,
    /// Light-bleeding reduction amount for VSM/EVSM, in [0, 1).
    pub light_bleeding_reduction: f32,
    /// ESM steepness.
    pub esm_exponent: f32,
    /// EVSM positive warp exponent.
    pub evsm_positive_exponent: f32,
    /// EVSM negative warp exponent.
    pub evsm_negative_exponent: f32,
    /// Minimum variance kept when decoding moments.
    pub min_variance: f32,
    /// Gaussian blur width in texels, odd, 3 to 15.
    pub blur_kernel: u32,
    /// Gaussian standard deviation in texels.
    pub blur_sigma: f32,
    /// Use a rotation-invariant square window per cascade.
    pub fixed_size_frustum: bool,
    /// Quantize each cascade window to whole texels.
    pub snap_to_texel: bool,
    /// Build a mip chain for moment slices after filtering.
    pub generate_mips: bool,
    /// Light-space depth range policy.
    pub near_far_fit: NearFarFit,
    /// Frustum coverage policy for the X/Y window.
    pub xy_fit: XyFit,
    /// Cascade selection policy at shading time.
    pub selection: CascadeSelection,
    /// Tint shaded output by cascade index.
    pub debug_tint: bool,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            technique: ShadowTechnique::DepthOnly,
            cascade_count: 4,
            resolution: 1024,
            split_percentages: vec![0.04, 0.10, 0.25, 1.0],
            blend_fraction: 0.1,
            pcf_kernel: 3,
            depth_bias: DepthBias::default(),
            light_bleeding_reduction: 0.2,
            esm_exponent: 60.0,
            evsm_positive_exponent: 40.0,
            evsm_negative_exponent: 5.0,
            min_variance: 1e-5,
            blur_kernel: 5,
            blur_sigma: 1.5,
            fixed_size_frustum: true,
            snap_to_texel: true,
            generate_mips: false,
            near_far_fit: NearFarFit::SceneIntersection,
            xy_fit: XyFit::Cascade,
            selection: CascadeSelection::Map,
            debug_tint: false,
        }
    }
}

impl ShadowSettings {
    /// Clamp every knob into its supported range.
    ///
    /// - cascade count to [1, 8]
    /// - resolution to a power of two in [16, 8192]
    /// - split percentages resized to the cascade count, clamped to (0, 1]
    ///   and made non-decreasing
    /// - kernel sizes to the nearest supported odd width
    /// - exponents and variances to finite, non-negative values
    pub fn sanitized(&self) -> ShadowSettings {
        let cascade_count = self.cascade_count.clamp(1, MAX_CASCADES as u32);
        let resolution = self
            .resolution
            .clamp(MIN_RESOLUTION, MAX_RESOLUTION)
            .next_power_of_two();

        let mut split_percentages = Vec::with_capacity(cascade_count as usize);
        let mut previous = 0.0_f32;
        for i in 0..cascade_count as usize {
            let fallback = (i + 1) as f32 / cascade_count as f32;
            let raw = self.split_percentages.get(i).copied().unwrap_or(fallback);
            let raw = if raw.is_finite() { raw } else { fallback };
            let clamped = raw.clamp(f32::EPSILON, 1.0).max(previous);
            split_percentages.push(clamped);
            previous = clamped;
        }

        ShadowSettings {
            technique: self.technique,
            cascade_count,
            resolution,
            split_percentages,
            blend_fraction: finite_or(self.blend_fraction, 0.0).clamp(0.0, 0.5),
            pcf_kernel: odd_in_range(self.pcf_kernel, 1, 7),
            depth_bias: sanitize_bias(self.depth_bias),
            light_bleeding_reduction: finite_or(self.light_bleeding_reduction, 0.0)
                .clamp(0.0, 0.99),
            esm_exponent: finite_or(self.esm_exponent, 0.0).max(0.0),
            evsm_positive_exponent: finite_or(self.evsm_positive_exponent, 0.0).max(0.0),
            evsm_negative_exponent: finite_or(self.evsm_negative_exponent, 0.0).max(0.0),
            min_variance: finite_or(self.min_variance, 1e-5).max(1e-9),
            blur_kernel: odd_in_range(self.blur_kernel, 3, 15),
            blur_sigma: finite_or(self.blur_sigma, 1.0).max(0.05),
            fixed_size_frustum: self.fixed_size_frustum,
            snap_to_texel: self.snap_to_texel,
            generate_mips: self.generate_mips,
            near_far_fit: self.near_far_fit,
            xy_fit: self.xy_fit,
            selection: self.selection,
            debug_tint: self.debug_tint,
        }
    }

    /// Number of mip levels a slice carries under these settings.
    pub fn mip_level_count(&self) -> u32 {
        if self.generate_mips && self.technique.uses_moments() {
            self.resolution.max(1).ilog2() + 1
        } else {
            1
        }
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}

fn odd_in_range(value: u32, min: u32, max: u32) -> u32 {
    let clamped = value.clamp(min, max);
    if clamped % 2 == 0 {
        (clamped + 1).min(max)
    } else {
        clamped
    }
}

fn sanitize_bias(bias: DepthBias) -> DepthBias {
    match bias {
        DepthBias::Flat { bias } => DepthBias::Flat {
            bias: finite_or(bias, 0.0).max(0.0),
        },
        DepthBias::Gradient {
            constant,
            slope_scale,
            max,
        } => {
            let constant = finite_or(constant, 0.0).max(0.0);
            DepthBias::Gradient {
                constant,
                slope_scale: finite_or(slope_scale, 0.0).max(0.0),
                max: finite_or(max, constant).max(constant),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_already_sane() {
        let settings = ShadowSettings::default();
        assert_eq!(settings.sanitized(), settings);
    }

    #[test]
    fn test_cascade_count_clamped() {
        let zero = ShadowSettings {
            cascade_count: 0,
            ..Default::default()
        };
        assert_eq!(zero.sanitized().cascade_count, 1);
        let many = ShadowSettings {
            cascade_count: 20,
            ..Default::default()
        };
        let s = many.sanitized();
        assert_eq!(s.cascade_count, 8);
        assert_eq!(s.split_percentages.len(), 8);
    }

    #[test]
    fn test_resolution_rounded_to_power_of_two() {
        let settings = ShadowSettings {
            resolution: 1000,
            ..Default::default()
        };
        assert_eq!(settings.sanitized().resolution, 1024);
        let tiny = ShadowSettings {
            resolution: 3,
            ..Default::default()
        };
        assert_eq!(tiny.sanitized().resolution, MIN_RESOLUTION);
        let huge = ShadowSettings {
            resolution: 100_000,
            ..Default::default()
        };
        assert_eq!(huge.sanitized().resolution, MAX_RESOLUTION);
    }

    #[test]
    fn test_split_percentages_made_monotonic() {
        let settings = ShadowSettings {
            split_percentages: vec![0.3, 0.1, 2.0, f32::NAN],
            ..Default::default()
        };
        let s = settings.sanitized();
        assert_eq!(s.split_percentages.len(), 4);
        for pair in s.split_percentages.windows(2) {
            assert!(pair[0] <= pair[1], "not monotonic: {:?}", s.split_percentages);
        }
        assert_eq!(s.split_percentages[1], 0.3);
        assert_eq!(s.split_percentages[2], 1.0);
    }

    #[test]
    fn test_missing_splits_filled_uniformly() {
        let settings = ShadowSettings {
            cascade_count: 4,
            split_percentages: vec![0.1],
            ..Default::default()
        };
        let s = settings.sanitized();
        assert_eq!(s.split_percentages, vec![0.1, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_kernel_sizes_forced_odd() {
        let settings = ShadowSettings {
            pcf_kernel: 4,
            blur_kernel: 20,
            ..Default::default()
        };
        let s = settings.sanitized();
        assert_eq!(s.pcf_kernel, 5);
        assert_eq!(s.blur_kernel, 15);
        let small = ShadowSettings {
            blur_kernel: 0,
            pcf_kernel: 0,
            ..Default::default()
        };
        assert_eq!(small.sanitized().blur_kernel, 3);
        assert_eq!(small.sanitized().pcf_kernel, 1);
    }

    #[test]
    fn test_gradient_bias_resolves_and_clamps() {
        let bias = DepthBias::Gradient {
            constant: 0.001,
            slope_scale: 2.0,
            max: 0.01,
        };
        assert!((bias.resolve(0.0) - 0.001).abs() < 1e-7);
        assert!((bias.resolve(0.002) - 0.005).abs() < 1e-7);
        assert!((bias.resolve(1.0) - 0.01).abs() < 1e-7);
    }

    #[test]
    fn test_mip_count_only_for_moment_techniques() {
        let depth = ShadowSettings {
            generate_mips: true,
            resolution: 1024,
            ..Default::default()
        };
        assert_eq!(depth.mip_level_count(), 1);
        let vsm = ShadowSettings {
            technique: ShadowTechnique::Vsm,
            ..depth
        };
        assert_eq!(vsm.mip_level_count(), 11);
    }

    #[test]
    fn test_technique_table_indices_unique() {
        for (i, t) in ShadowTechnique::ALL.iter().enumerate() {
            assert_eq!(t.index(), i);
        }
    }

    #[test]
    fn test_esm_blurs_in_log_domain() {
        assert_eq!(ShadowTechnique::Esm.blur_domain(), Some(BlurDomain::Log));
        assert_eq!(ShadowTechnique::Vsm.blur_domain(), Some(BlurDomain::Linear));
        assert_eq!(ShadowTechnique::DepthOnly.blur_domain(), None);
    }

    #[test]
    fn test_settings_ron_roundtrip() {
        let settings = ShadowSettings {
            technique: ShadowTechnique::Evsm4,
            depth_bias: DepthBias::Gradient {
                constant: 0.001,
                slope_scale: 1.5,
                max: 0.02,
            },
            ..Default::default()
        };
        let text = ron::to_string(&settings).unwrap();
        let back: ShadowSettings = ron::from_str(&text).unwrap();
        assert_eq!(settings, back);
    }
}
