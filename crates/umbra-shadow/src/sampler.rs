//! Shading-time cascade selection, blending and decode.
//!
//! This is the CPU reference for the WGSL sampling library: the same
//! selection rules, the same blend ramp and the same per-technique decode,
//! reading texels through [`ShadowTexels`].

use glam::{Vec2, Vec3, Vec4};

use crate::cascade::CascadeSet;
use crate::filter::log_sum_exp;
use crate::image::ShadowImage;
use crate::settings::{CascadeSelection, ShadowSettings, ShadowTechnique};
use crate::technique::{TechniqueParams, decode};

/// Debug colours, one per cascade index.
pub const CASCADE_TINTS: [Vec3; 8] = [
    Vec3::new(1.0, 0.3, 0.3),
    Vec3::new(0.3, 1.0, 0.3),
    Vec3::new(0.3, 0.3, 1.0),
    Vec3::new(1.0, 1.0, 0.3),
    Vec3::new(1.0, 0.3, 1.0),
    Vec3::new(0.3, 1.0, 1.0),
    Vec3::new(1.0, 0.6, 0.2),
    Vec3::new(0.6, 0.6, 0.6),
];

/// Read access to the encoded slices.
pub trait ShadowTexels {
    /// Slice width and height in texels.
    fn resolution(&self) -> u32;

    /// Texel `(x, y)` of slice `cascade`, clamped to the slice edge.
    fn texel(&self, cascade: usize, x: i32, y: i32) -> Vec4;
}

impl ShadowTexels for [ShadowImage] {
    fn resolution(&self) -> u32 {
        self.first().map_or(1, ShadowImage::size)
    }

    fn texel(&self, cascade: usize, x: i32, y: i32) -> Vec4 {
        self.get(cascade)
            .or_else(|| self.last())
            .map_or(Vec4::ZERO, |image| image.get(x, y))
    }
}

/// A shaded point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowReceiver {
    pub world_position: Vec3,
    /// Positive eye depth in the viewer camera.
    pub eye_depth: f32,
    /// Change of shadow depth per shadow texel along u and v. Zero for a
    /// receiver facing the light.
    pub depth_gradient: Vec2,
}

impl ShadowReceiver {
    pub fn new(world_position: Vec3, eye_depth: f32) -> Self {
        Self {
            world_position,
            eye_depth,
            depth_gradient: Vec2::ZERO,
        }
    }

    pub fn with_gradient(mut self, depth_gradient: Vec2) -> Self {
        self.depth_gradient = depth_gradient;
        self
    }
}

/// First cascade whose far boundary lies beyond `depth`.
pub fn select_map(boundaries: &[f32], depth: f32) -> usize {
    let count = boundaries.len().saturating_sub(1).max(1);
    boundaries[1..]
        .iter()
        .position(|&far| depth < far)
        .unwrap_or(count - 1)
}

/// Number of interior boundaries at or below `depth`.
pub fn select_interval(boundaries: &[f32], depth: f32) -> usize {
    let count = boundaries.len().saturating_sub(1).max(1);
    let interior = &boundaries[1..boundaries.len().saturating_sub(1).max(1)];
    interior.iter().filter(|&&b| b <= depth).count().min(count - 1)
}

/// Shadow depth change per texel from screen-space derivatives of the
/// shadow coordinate `(u, v, depth)`.
///
/// Solves the 2×2 system relating screen derivatives of uv to those of
/// depth. Returns zero where the mapping is singular.
pub fn depth_gradient_per_texel(duvz_dx: Vec3, duvz_dy: Vec3, resolution: u32) -> Vec2 {
    let det = duvz_dx.x * duvz_dy.y - duvz_dx.y * duvz_dy.x;
    if det.abs() < 1e-12 {
        return Vec2::ZERO;
    }
    let ddepth_du = (duvz_dy.y * duvz_dx.z - duvz_dx.y * duvz_dy.z) / det;
    let ddepth_dv = (duvz_dx.x * duvz_dy.z - duvz_dy.x * duvz_dx.z) / det;
    Vec2::new(ddepth_du, ddepth_dv) / resolution.max(1) as f32
}

/// Selects, samples and blends cascades for shaded points.
#[derive(Debug, Clone)]
pub struct CascadeSampler<'a> {
    cascades: &'a CascadeSet,
    settings: ShadowSettings,
    params: TechniqueParams,
}

impl<'a> CascadeSampler<'a> {
    pub fn new(cascades: &'a CascadeSet, settings: &ShadowSettings) -> Self {
        let settings = settings.sanitized();
        let params = TechniqueParams::from(&settings);
        Self {
            cascades,
            settings,
            params,
        }
    }

    /// Cascade index for an eye depth under the selection policy.
    pub fn select(&self, eye_depth: f32) -> usize {
        let boundaries = self.cascades.partition().boundaries();
        match self.settings.selection {
            CascadeSelection::Map => select_map(boundaries, eye_depth),
            CascadeSelection::Interval => select_interval(boundaries, eye_depth),
        }
    }

    /// Weight of cascade `index` when `eye_depth` falls in the band before
    /// its far boundary, `None` outside the band or for the last cascade.
    ///
    /// The weight falls linearly from 1 at the start of the band to 0 at
    /// the boundary, where the next cascade takes over alone.
    pub fn blend_weight(&self, index: usize, eye_depth: f32) -> Option<f32> {
        if index + 1 >= self.cascades.len() {
            return None;
        }
        let interval = self.cascades.partition().interval(index);
        let band = self.settings.blend_fraction * interval.length();
        if band <= 0.0 || eye_depth <= interval.far - band {
            return None;
        }
        Some(((interval.far - eye_depth) / band).clamp(0.0, 1.0))
    }

    /// Visibility in [0, 1] of a receiver.
    pub fn visibility<T>(&self, texels: &T, receiver: &ShadowReceiver) -> f32
    where
        T: ShadowTexels + ?Sized,
    {
        let index = self.select(receiver.eye_depth);
        let current = self.cascade_visibility(texels, index, receiver).unwrap_or(1.0);
        match self.blend_weight(index, receiver.eye_depth) {
            Some(weight) => {
                let next = self
                    .cascade_visibility(texels, index + 1, receiver)
                    .unwrap_or(current);
                next + (current - next) * weight
            }
            None => current,
        }
    }

    /// Visibility from a single cascade, `None` when the receiver falls
    /// outside that cascade's window.
    pub fn cascade_visibility<T>(&self, texels: &T, index: usize, receiver: &ShadowReceiver) -> Option<f32>
    where
        T: ShadowTexels + ?Sized,
    {
        let cascade = self.cascades.get(index)?;
        let coord = cascade.shadow_coord(receiver.world_position);
        if !(0.0..=1.0).contains(&coord.x) || !(0.0..=1.0).contains(&coord.y) {
            return None;
        }
        let resolution = texels.resolution() as f32;
        let texel_pos = Vec2::new(coord.x, coord.y) * resolution;
        let depth = coord.z.clamp(0.0, 1.0);

        let technique = self.settings.technique;
        Some(match technique {
            ShadowTechnique::DepthOnly => self.pcf(texels, index, texel_pos, depth, receiver.depth_gradient),
            _ => {
                let stored = sample_bilinear(texels, index, texel_pos, technique == ShadowTechnique::Esm);
                decode(technique, &self.params, stored, depth)
            }
        })
    }

    /// Box-filtered bilinear depth comparisons over a `k × k` texel window.
    fn pcf<T>(&self, texels: &T, index: usize, texel_pos: Vec2, depth: f32, gradient: Vec2) -> f32
    where
        T: ShadowTexels + ?Sized,
    {
        let bias = self.settings.depth_bias;
        let gradient = if bias.is_gradient() { gradient } else { Vec2::ZERO };
        let bias = bias.resolve(gradient.abs().max_element());
        let r = (self.settings.pcf_kernel / 2) as i32;

        let mut sum = 0.0;
        for j in -r..=r {
            for i in -r..=r {
                let offset = Vec2::new(i as f32, j as f32);
                let reference = depth + gradient.dot(offset) - bias;
                sum += compare_bilinear(texels, index, texel_pos + offset, reference);
            }
        }
        let taps = (2 * r + 1) * (2 * r + 1);
        sum / taps as f32
    }

    /// Debug colour for a receiver, blended like the visibility.
    pub fn debug_tint(&self, eye_depth: f32) -> Vec3 {
        let index = self.select(eye_depth);
        let current = CASCADE_TINTS[index % CASCADE_TINTS.len()];
        match self.blend_weight(index, eye_depth) {
            Some(weight) => CASCADE_TINTS[(index + 1) % CASCADE_TINTS.len()].lerp(current, weight),
            None => current,
        }
    }
}

/// Top-left texel of the 2×2 bilinear footprint and the fractional
/// position inside it. Texel centers sit at half-integers.
fn bilinear_footprint(texel_pos: Vec2) -> (i32, i32, Vec2) {
    let p = texel_pos - Vec2::splat(0.5);
    let base = p.floor();
    (base.x as i32, base.y as i32, p - base)
}

fn mix<T>(a: T, b: T, t: f32) -> T
where
    T: Copy + std::ops::Add<Output = T> + std::ops::Sub<Output = T> + std::ops::Mul<f32, Output = T>,
{
    a + (b - a) * t
}

fn compare_bilinear<T>(texels: &T, index: usize, texel_pos: Vec2, reference: f32) -> f32
where
    T: ShadowTexels + ?Sized,
{
    let (x, y, t) = bilinear_footprint(texel_pos);
    let lit = |dx: i32, dy: i32| {
        if reference <= texels.texel(index, x + dx, y + dy).x {
            1.0
        } else {
            0.0
        }
    };
    mix(mix(lit(0, 0), lit(1, 0), t.x), mix(lit(0, 1), lit(1, 1), t.x), t.y)
}

/// Manual bilinear filter. Log-stored texels are interpolated with
/// log-sum-exp so the result matches filtering the exponentials.
fn sample_bilinear<T>(texels: &T, index: usize, texel_pos: Vec2, log_domain: bool) -> Vec4
where
    T: ShadowTexels + ?Sized,
{
    let (x, y, t) = bilinear_footprint(texel_pos);
    let s00 = texels.texel(index, x, y);
    let s10 = texels.texel(index, x + 1, y);
    let s01 = texels.texel(index, x, y + 1);
    let s11 = texels.texel(index, x + 1, y + 1);
    if log_domain {
        let terms = [
            ((1.0 - t.x) * (1.0 - t.y), s00.x),
            (t.x * (1.0 - t.y), s10.x),
            ((1.0 - t.x) * t.y, s01.x),
            (t.x * t.y, s11.x),
        ];
        Vec4::new(log_sum_exp(terms.into_iter()), 0.0, 0.0, 0.0)
    } else {
        mix(mix(s00, s10, t.x), mix(s01, s11, t.x), t.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{LightCamera, ViewerCamera};
    use crate::cascade::compute_cascades;
    use crate::settings::{DepthBias, NearFarFit};
    use crate::technique::encode;
    use umbra_math::Aabb;

    fn viewer() -> ViewerCamera {
        ViewerCamera::look_at(
            Vec3::new(5.0, 8.0, 20.0),
            Vec3::ZERO,
            std::f32::consts::FRAC_PI_3,
            1.5,
            0.5,
            120.0,
        )
    }

    fn light() -> LightCamera {
        LightCamera::directional(Vec3::new(0.3, -1.0, 0.2))
    }

    fn scene() -> Aabb {
        Aabb::new(Vec3::new(-80.0, -5.0, -80.0), Vec3::new(80.0, 30.0, 80.0))
    }

    fn receiver_at(viewer: &ViewerCamera, depth: f32) -> ShadowReceiver {
        ShadowReceiver::new(viewer.position() + viewer.forward() * depth, depth)
    }

    fn constant_slices(count: usize, size: u32, value: Vec4) -> Vec<ShadowImage> {
        (0..count).map(|_| ShadowImage::new(size, value)).collect()
    }

    #[test]
    fn test_selection_policies_agree() {
        let boundaries = [0.5, 4.0, 12.0, 40.0, 120.0];
        for step in 0..=260 {
            let depth = step as f32 * 0.5;
            assert_eq!(
                select_map(&boundaries, depth),
                select_interval(&boundaries, depth),
                "policies disagree at {depth}"
            );
        }
        assert_eq!(select_map(&boundaries, 0.0), 0);
        assert_eq!(select_map(&boundaries, 3.99), 0);
        assert_eq!(select_map(&boundaries, 4.0), 1);
        assert_eq!(select_map(&boundaries, 500.0), 3);
        assert_eq!(select_interval(&boundaries, 500.0), 3);
    }

    #[test]
    fn test_single_cascade_selection() {
        assert_eq!(select_map(&[0.1, 10.0], 50.0), 0);
        assert_eq!(select_interval(&[0.1, 10.0], 50.0), 0);
    }

    #[test]
    fn test_flat_bias_lit_and_shadowed() {
        let viewer = viewer();
        let bias = 0.002;
        let settings = ShadowSettings {
            pcf_kernel: 1,
            depth_bias: DepthBias::Flat { bias },
            blend_fraction: 0.0,
            ..Default::default()
        };
        let set = compute_cascades(&viewer, &light(), Some(&scene()), &settings);
        let sampler = CascadeSampler::new(&set, &settings);
        let receiver = receiver_at(&viewer, 6.0);
        let index = sampler.select(receiver.eye_depth);
        let t = set.cascades()[index].shadow_coord(receiver.world_position).z;

        // Receiver depth equals stored - bias: lit.
        let lit = constant_slices(set.len(), 64, Vec4::new(t + bias, 0.0, 0.0, 0.0));
        assert_eq!(sampler.visibility(lit.as_slice(), &receiver), 1.0);
        // Receiver depth beyond stored + bias: shadowed.
        let dark = constant_slices(set.len(), 64, Vec4::new(t - 1.5 * bias, 0.0, 0.0, 0.0));
        assert_eq!(sampler.visibility(dark.as_slice(), &receiver), 0.0);
    }

    #[test]
    fn test_pcf_softens_shadow_edge() {
        let viewer = viewer();
        let base = ShadowSettings {
            blend_fraction: 0.0,
            ..Default::default()
        };
        let set = compute_cascades(&viewer, &light(), Some(&scene()), &base);
        let receiver = receiver_at(&viewer, 6.0);
        let index = CascadeSampler::new(&set, &base).select(6.0);
        let coord = set.cascades()[index].shadow_coord(receiver.world_position);
        let size = 64;
        let edge_x = (coord.x * size as f32).floor() as u32;
        // Occluders on the left half of the edge, nothing on the right.
        let slices: Vec<ShadowImage> = (0..set.len())
            .map(|_| {
                ShadowImage::from_depths(ShadowTechnique::DepthOnly, &TechniqueParams::default(), size, |x, _| {
                    if x < edge_x { 0.0 } else { 1.0 }
                })
            })
            .collect();

        let hard = ShadowSettings { pcf_kernel: 1, ..base.clone() };
        let soft = ShadowSettings { pcf_kernel: 7, ..base };
        let hard_v = CascadeSampler::new(&set, &hard).visibility(slices.as_slice(), &receiver);
        let soft_v = CascadeSampler::new(&set, &soft).visibility(slices.as_slice(), &receiver);
        assert!(soft_v > 0.0 && soft_v < 1.0, "7x7 PCF should straddle the edge: {soft_v}");
        assert!((0.0..=1.0).contains(&hard_v));
    }

    #[test]
    fn test_gradient_bias_removes_acne_on_slope() {
        // Stored depths lie on a plane sloping 0.01 per texel along u; a
        // receiver on that plane between texel centers must stay lit.
        let size = 64;
        let slope = 0.01;
        let plane = ShadowImage::from_depths(ShadowTechnique::DepthOnly, &TechniqueParams::default(), size, |x, _| {
            0.2 + slope * (x as f32 + 0.5)
        });
        let slices = vec![plane];
        let texel_pos = Vec2::new(20.9, 10.5);
        let depth = 0.2 + slope * texel_pos.x;

        let viewer = viewer();
        let flat = ShadowSettings {
            cascade_count: 1,
            pcf_kernel: 1,
            depth_bias: DepthBias::Flat { bias: 0.001 },
            ..Default::default()
        };
        let gradient = ShadowSettings {
            depth_bias: DepthBias::Gradient {
                constant: 0.001,
                slope_scale: 1.0,
                max: 0.05,
            },
            ..flat.clone()
        };
        let set = compute_cascades(&viewer, &light(), None, &flat);
        let g = Vec2::new(slope, 0.0);
        let flat_v = CascadeSampler::new(&set, &flat).pcf(slices.as_slice(), 0, texel_pos, depth, g);
        let grad_v = CascadeSampler::new(&set, &gradient).pcf(slices.as_slice(), 0, texel_pos, depth, g);
        assert!(flat_v < 1.0, "flat bias should show acne here: {flat_v}");
        assert_eq!(grad_v, 1.0, "gradient bias should keep the slope lit");
    }

    #[test]
    fn test_depth_gradient_from_screen_derivatives() {
        // depth = 0.3 + 0.5u + 0.2v
        let dx = Vec3::new(0.01, 0.0, 0.005);
        let dy = Vec3::new(0.0, 0.02, 0.004);
        let g = depth_gradient_per_texel(dx, dy, 100);
        assert!((g.x - 0.005).abs() < 1e-6 && (g.y - 0.002).abs() < 1e-6, "{g}");
        assert_eq!(depth_gradient_per_texel(Vec3::ZERO, dy, 100), Vec2::ZERO);
    }

    #[test]
    fn test_blend_is_continuous_across_boundary() {
        let viewer = viewer();
        let settings = ShadowSettings {
            pcf_kernel: 1,
            blend_fraction: 0.2,
            near_far_fit: NearFarFit::SceneAabb,
            ..Default::default()
        };
        let set = compute_cascades(&viewer, &light(), Some(&scene()), &settings);
        // Cascade 0 fully shadowed, every other cascade fully lit.
        let mut slices = constant_slices(set.len(), 32, Vec4::splat(1.0));
        slices[0] = ShadowImage::new(32, Vec4::ZERO);

        let interval = set.partition().interval(0);
        let band = 0.2 * interval.length();
        let sampler = CascadeSampler::new(&set, &settings);
        let steps = 100;
        let start = interval.far - band * 1.5;
        let end = interval.far + band * 0.5;
        let mut previous = sampler.visibility(slices.as_slice(), &receiver_at(&viewer, start));
        let mut max_jump: f32 = 0.0;
        for i in 1..=steps {
            let depth = start + (end - start) * i as f32 / steps as f32;
            let v = sampler.visibility(slices.as_slice(), &receiver_at(&viewer, depth));
            max_jump = max_jump.max((v - previous).abs());
            previous = v;
        }
        assert_eq!(
            sampler.visibility(slices.as_slice(), &receiver_at(&viewer, start)),
            0.0
        );
        assert_eq!(previous, 1.0);
        assert!(max_jump < 0.05, "visibility jumped by {max_jump} across the boundary");

        // Without blending the same sweep has a hard step.
        let hard = ShadowSettings {
            blend_fraction: 0.0,
            ..settings
        };
        let sampler = CascadeSampler::new(&set, &hard);
        let before = sampler.visibility(slices.as_slice(), &receiver_at(&viewer, interval.far - 0.01));
        let after = sampler.visibility(slices.as_slice(), &receiver_at(&viewer, interval.far + 0.01));
        assert_eq!((before, after), (0.0, 1.0));
    }

    #[test]
    fn test_blend_weight_ramp() {
        let set = compute_cascades(&viewer(), &light(), None, &ShadowSettings::default());
        let sampler = CascadeSampler::new(&set, &ShadowSettings::default());
        let interval = set.partition().interval(1);
        let band = 0.1 * interval.length();
        assert_eq!(sampler.blend_weight(1, interval.far - band * 2.0), None);
        let mid = sampler.blend_weight(1, interval.far - band * 0.5).unwrap();
        assert!((mid - 0.5).abs() < 1e-3);
        assert_eq!(sampler.blend_weight(set.len() - 1, set.partition().far() - 0.001), None);
    }

    #[test]
    fn test_vsm_through_sampler() {
        let viewer = viewer();
        let settings = ShadowSettings {
            technique: ShadowTechnique::Vsm,
            light_bleeding_reduction: 0.0,
            blend_fraction: 0.0,
            ..Default::default()
        };
        let set = compute_cascades(&viewer, &light(), Some(&scene()), &settings);
        let sampler = CascadeSampler::new(&set, &settings);
        let receiver = receiver_at(&viewer, 20.0);
        let index = sampler.select(20.0);
        let t = set.cascades()[index].shadow_coord(receiver.world_position).z;
        let params = TechniqueParams::from(&settings);

        let at_receiver = constant_slices(set.len(), 32, encode(ShadowTechnique::Vsm, &params, t));
        assert_eq!(sampler.visibility(at_receiver.as_slice(), &receiver), 1.0);
        let in_front = constant_slices(set.len(), 32, encode(ShadowTechnique::Vsm, &params, t - 0.1));
        assert!(sampler.visibility(in_front.as_slice(), &receiver) < 0.01);
    }

    #[test]
    fn test_esm_bilinear_in_log_domain() {
        let params = TechniqueParams::default();
        let mut image = ShadowImage::new(4, encode(ShadowTechnique::Esm, &params, 0.2));
        image.set(1, 1, encode(ShadowTechnique::Esm, &params, 0.9));
        let slices = vec![image];
        let s = sample_bilinear(slices.as_slice(), 0, Vec2::new(1.0, 1.0), true);
        let expected = (0.75 * (params.esm_exponent * 0.2).exp() + 0.25 * (params.esm_exponent * 0.9).exp()).ln();
        assert!((s.x - expected).abs() < 1e-3, "{} vs {expected}", s.x);
    }

    #[test]
    fn test_receiver_outside_window_is_lit() {
        let viewer = viewer();
        let set = compute_cascades(&viewer, &light(), Some(&scene()), &ShadowSettings::default());
        let sampler = CascadeSampler::new(&set, &ShadowSettings::default());
        let slices = constant_slices(set.len(), 16, Vec4::ZERO);
        let far_away = ShadowReceiver::new(Vec3::splat(50_000.0), 3.0);
        assert_eq!(sampler.cascade_visibility(slices.as_slice(), 0, &far_away), None);
        assert_eq!(sampler.visibility(slices.as_slice(), &far_away), 1.0);
    }

    #[test]
    fn test_debug_tint_per_cascade() {
        let settings = ShadowSettings {
            blend_fraction: 0.0,
            ..Default::default()
        };
        let set = compute_cascades(&viewer(), &light(), None, &settings);
        let sampler = CascadeSampler::new(&set, &settings);
        for (i, interval) in set.partition().intervals().enumerate() {
            let mid = (interval.near + interval.far) * 0.5;
            assert_eq!(sampler.debug_tint(mid), CASCADE_TINTS[i]);
        }
    }
}
