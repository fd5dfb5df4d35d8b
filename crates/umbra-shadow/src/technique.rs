//! Encode and decode math for every shadow technique.
//!
//! Each technique has one encode function (depth to stored texel) and one
//! decode function (stored texel and receiver depth to visibility). They
//! are dispatched through [`ENCODERS`] and [`DECODERS`], indexed by
//! [`ShadowTechnique::index`]. The WGSL encode and sampling shaders mirror
//! these functions one to one.
//!
//! Depths are normalized shadow depths in [0, 1], 0 nearest the light.
//! ESM texels hold the exponent `c * d` rather than `exp(c * d)`, so the
//! stored value never overflows; decode and blur work on that log form.

use glam::{Vec2, Vec4};

use crate::settings::{ShadowSettings, ShadowTechnique};

/// Scalars the encode and decode functions depend on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TechniqueParams {
    pub esm_exponent: f32,
    pub evsm_positive_exponent: f32,
    pub evsm_negative_exponent: f32,
    pub min_variance: f32,
    pub light_bleeding_reduction: f32,
}

impl Default for TechniqueParams {
    fn default() -> Self {
        Self::from(&ShadowSettings::default())
    }
}

impl From<&ShadowSettings> for TechniqueParams {
    fn from(settings: &ShadowSettings) -> Self {
        Self {
            esm_exponent: settings.esm_exponent,
            evsm_positive_exponent: settings.evsm_positive_exponent,
            evsm_negative_exponent: settings.evsm_negative_exponent,
            min_variance: settings.min_variance,
            light_bleeding_reduction: settings.light_bleeding_reduction,
        }
    }
}

/// Depth to stored texel.
pub type EncodeFn = fn(&TechniqueParams, f32) -> Vec4;
/// Stored texel and receiver depth to visibility in [0, 1].
pub type DecodeFn = fn(&TechniqueParams, Vec4, f32) -> f32;

pub const ENCODERS: [EncodeFn; 5] = [
    encode_depth,
    encode_vsm,
    encode_esm,
    encode_evsm2,
    encode_evsm4,
];

pub const DECODERS: [DecodeFn; 5] = [
    decode_depth,
    decode_vsm,
    decode_esm,
    decode_evsm2,
    decode_evsm4,
];

pub fn encode(technique: ShadowTechnique, params: &TechniqueParams, depth: f32) -> Vec4 {
    ENCODERS[technique.index()](params, depth)
}

/// Visibility of a receiver at `depth` against a stored (possibly filtered)
/// texel. DepthOnly expects the bias to be already subtracted from `depth`.
pub fn decode(technique: ShadowTechnique, params: &TechniqueParams, stored: Vec4, depth: f32) -> f32 {
    DECODERS[technique.index()](params, stored, depth)
}

fn encode_depth(_: &TechniqueParams, depth: f32) -> Vec4 {
    Vec4::new(depth, 0.0, 0.0, 0.0)
}

fn encode_vsm(_: &TechniqueParams, depth: f32) -> Vec4 {
    Vec4::new(depth, depth * depth, 0.0, 0.0)
}

fn encode_esm(params: &TechniqueParams, depth: f32) -> Vec4 {
    Vec4::new(params.esm_exponent * depth, 0.0, 0.0, 0.0)
}

fn encode_evsm2(params: &TechniqueParams, depth: f32) -> Vec4 {
    let w = warp_depth(params, depth);
    Vec4::new(w.x, w.x * w.x, 0.0, 0.0)
}

fn encode_evsm4(params: &TechniqueParams, depth: f32) -> Vec4 {
    let w = warp_depth(params, depth);
    Vec4::new(w.x, w.x * w.x, w.y, w.y * w.y)
}

fn decode_depth(_: &TechniqueParams, stored: Vec4, depth: f32) -> f32 {
    if depth <= stored.x { 1.0 } else { 0.0 }
}

fn decode_vsm(params: &TechniqueParams, stored: Vec4, depth: f32) -> f32 {
    let p = chebyshev_upper_bound(stored.truncate().truncate(), depth, params.min_variance);
    reduce_light_bleeding(p, params.light_bleeding_reduction)
}

fn decode_esm(params: &TechniqueParams, stored: Vec4, depth: f32) -> f32 {
    (stored.x - params.esm_exponent * depth).exp().clamp(0.0, 1.0)
}

fn decode_evsm2(params: &TechniqueParams, stored: Vec4, depth: f32) -> f32 {
    let w = warp_depth(params, depth);
    let var = evsm_min_variance(params, w);
    let p = chebyshev_upper_bound(Vec2::new(stored.x, stored.y), w.x, var.x);
    reduce_light_bleeding(p, params.light_bleeding_reduction)
}

fn decode_evsm4(params: &TechniqueParams, stored: Vec4, depth: f32) -> f32 {
    let w = warp_depth(params, depth);
    let var = evsm_min_variance(params, w);
    let pos = chebyshev_upper_bound(Vec2::new(stored.x, stored.y), w.x, var.x);
    let neg = chebyshev_upper_bound(Vec2::new(stored.z, stored.w), w.y, var.y);
    reduce_light_bleeding(pos.min(neg), params.light_bleeding_reduction)
}

/// EVSM warp of a [0, 1] depth: `(exp(c+ * d'), -exp(-c- * d'))` with
/// `d' = 2d - 1`. Both components increase with depth.
pub fn warp_depth(params: &TechniqueParams, depth: f32) -> Vec2 {
    let d = 2.0 * depth - 1.0;
    Vec2::new(
        (params.evsm_positive_exponent * d).exp(),
        -(-params.evsm_negative_exponent * d).exp(),
    )
}

/// Warped-domain variance floor relative to `min_variance`.
pub const EVSM_VARIANCE_SCALE: f32 = 1e-3;

/// Minimum variance scaled into each warped domain by the warp's local slope.
fn evsm_min_variance(params: &TechniqueParams, warped: Vec2) -> Vec2 {
    let slope = Vec2::new(
        params.evsm_positive_exponent * warped.x,
        params.evsm_negative_exponent * warped.y,
    );
    slope * slope * (params.min_variance * EVSM_VARIANCE_SCALE)
}

/// One-sided Chebyshev upper bound on the fraction of the filter region
/// lit at depth `t`, from first and second moments.
pub fn chebyshev_upper_bound(moments: Vec2, t: f32, min_variance: f32) -> f32 {
    let mean = moments.x;
    if t <= mean {
        return 1.0;
    }
    let variance = (moments.y - mean * mean).max(min_variance);
    let d = t - mean;
    (variance / (variance + d * d)).clamp(0.0, 1.0)
}

/// Remap `p` with `linstep(amount, 1, p)`, cutting the low tail the
/// Chebyshev bound leaves in penumbrae behind multiple occluders.
pub fn reduce_light_bleeding(p: f32, amount: f32) -> f32 {
    if amount <= 0.0 {
        return p;
    }
    ((p - amount) / (1.0 - amount)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TechniqueParams {
        TechniqueParams {
            light_bleeding_reduction: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_vsm_roundtrip() {
        let p = params();
        for d in [0.1_f32, 0.37, 0.5, 0.9] {
            let stored = encode(ShadowTechnique::Vsm, &p, d);
            assert_eq!(decode(ShadowTechnique::Vsm, &p, stored, d), 1.0, "lit at d = {d}");
            let behind = decode(ShadowTechnique::Vsm, &p, stored, d + 0.05);
            assert!(behind < 1.0, "receiver behind {d} should be occluded, got {behind}");
        }
    }

    #[test]
    fn test_every_technique_lit_at_occluder_depth() {
        let p = params();
        for technique in ShadowTechnique::ALL {
            for d in [0.05_f32, 0.5, 0.95] {
                let stored = encode(technique, &p, d);
                let v = decode(technique, &p, stored, d);
                assert!(v > 0.99, "{technique:?} at {d}: {v}");
            }
        }
    }

    #[test]
    fn test_every_technique_shadowed_well_behind() {
        let p = params();
        for technique in ShadowTechnique::ALL {
            let stored = encode(technique, &p, 0.2);
            let v = decode(technique, &p, stored, 0.8);
            assert!(v < 0.05, "{technique:?} should shadow: {v}");
        }
    }

    #[test]
    fn test_depth_only_bias_window() {
        let p = params();
        let stored = encode(ShadowTechnique::DepthOnly, &p, 0.5);
        let bias = 0.002;
        // Receiver at stored - bias: lit.
        let receiver = 0.5 - bias;
        assert_eq!(decode(ShadowTechnique::DepthOnly, &p, stored, receiver - bias), 1.0);
        // Receiver beyond stored + bias: shadowed.
        let receiver = 0.5 + bias * 1.5;
        assert_eq!(decode(ShadowTechnique::DepthOnly, &p, stored, receiver - bias), 0.0);
    }

    #[test]
    fn test_esm_log_form_matches_exponential() {
        let p = TechniqueParams {
            esm_exponent: 10.0,
            ..params()
        };
        let stored = encode(ShadowTechnique::Esm, &p, 0.3);
        let t = 0.45;
        let expected = ((10.0_f32 * 0.3).exp() * (-10.0_f32 * t).exp()).clamp(0.0, 1.0);
        let got = decode(ShadowTechnique::Esm, &p, stored, t);
        assert!((got - expected).abs() < 1e-5, "{got} vs {expected}");
    }

    #[test]
    fn test_esm_clamped_in_front_of_occluder() {
        let p = params();
        let stored = encode(ShadowTechnique::Esm, &p, 0.6);
        assert_eq!(decode(ShadowTechnique::Esm, &p, stored, 0.1), 1.0);
    }

    #[test]
    fn test_warp_is_monotonic() {
        let p = params();
        let mut previous = warp_depth(&p, 0.0);
        for i in 1..=20 {
            let w = warp_depth(&p, i as f32 / 20.0);
            assert!(w.x > previous.x && w.y > previous.y);
            previous = w;
        }
    }

    #[test]
    fn test_chebyshev_variance_floor() {
        // A zero-variance texel still gives a finite, falling bound.
        let near = chebyshev_upper_bound(Vec2::new(0.5, 0.25), 0.5001, 1e-4);
        let far = chebyshev_upper_bound(Vec2::new(0.5, 0.25), 0.6, 1e-4);
        assert!(near.is_finite() && near > 0.9);
        assert!(far < near);
    }

    #[test]
    fn test_light_bleeding_reduction_cuts_tail() {
        assert_eq!(reduce_light_bleeding(0.1, 0.2), 0.0);
        assert_eq!(reduce_light_bleeding(1.0, 0.2), 1.0);
        assert!((reduce_light_bleeding(0.6, 0.2) - 0.5).abs() < 1e-6);
        assert_eq!(reduce_light_bleeding(0.3, 0.0), 0.3);
    }

    /// Two occluders at 0.3 and 0.8 averaged 50/50 into one texel, receiver
    /// at 0.9: the whole filter region is shadowed, so less visibility is
    /// better.
    #[test]
    fn test_evsm4_visibility_at_most_vsm_behind_two_occluders() {
        let p = params();
        let mix = |t: ShadowTechnique| (encode(t, &p, 0.3) + encode(t, &p, 0.8)) * 0.5;
        let vsm = decode(ShadowTechnique::Vsm, &p, mix(ShadowTechnique::Vsm), 0.9);
        let evsm = decode(ShadowTechnique::Evsm4, &p, mix(ShadowTechnique::Evsm4), 0.9);
        assert!(vsm > 0.3, "VSM should show light bleeding here: {vsm}");
        assert!(evsm <= vsm, "EVSM4 {evsm} should not exceed VSM {vsm}");
        assert!(evsm < 0.01, "EVSM4 should suppress the bleed: {evsm}");
    }

    #[test]
    fn test_evsm2_and_evsm4_agree_on_single_occluder() {
        let p = params();
        let e2 = decode(ShadowTechnique::Evsm2, &p, encode(ShadowTechnique::Evsm2, &p, 0.4), 0.5);
        let e4 = decode(ShadowTechnique::Evsm4, &p, encode(ShadowTechnique::Evsm4, &p, 0.4), 0.5);
        assert!(e4 <= e2 + 1e-6);
        assert!(e2 < 0.05);
    }
}
