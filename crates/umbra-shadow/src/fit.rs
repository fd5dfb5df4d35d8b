//! Fitting an orthographic light volume around a cascade.
//!
//! All inputs live in light-view space: the light looks down -Z, so a
//! larger z is closer to the light. The fitted volume becomes an
//! orthographic projection whose depth 0 is the side nearest the light.

use glam::{Mat4, Vec2, Vec3};
use umbra_math::{Aabb, DEGENERATE_EPSILON, clipped_z_range, pad_interval};

use crate::settings::{NearFarFit, ShadowSettings};
use crate::snap::TexelSnapper;

/// Orthographic light-view volume of one cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightVolume {
    /// X/Y window in light-view space.
    pub min: Vec2,
    pub max: Vec2,
    /// Light-view z of the far side (smallest z).
    pub z_min: f32,
    /// Light-view z of the side nearest the light (largest z).
    pub z_max: f32,
    /// Light-space size of one shadow texel on each axis.
    pub texel_size: Vec2,
}

impl LightVolume {
    /// Orthographic projection mapping the volume to clip x, y in [-1, 1]
    /// and depth in [0, 1], 0 nearest the light.
    pub fn projection(&self) -> Mat4 {
        Mat4::orthographic_rh(
            self.min.x,
            self.max.x,
            self.min.y,
            self.max.y,
            -self.z_max,
            -self.z_min,
        )
    }

    /// The volume as a light-view box.
    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.min.extend(self.z_min), self.max.extend(self.z_max))
    }
}

/// Fit the light volume for a cascade.
///
/// `corners` are the light-view corners the window must cover (the cascade
/// slice, or everything from the viewer's near plane under
/// [`XyFit::Scene`](crate::XyFit::Scene)). `scene` holds the light-view
/// corners of the scene box when one is known.
pub fn fit_cascade(
    corners: &[Vec3; 8],
    scene: Option<&[Vec3; 8]>,
    settings: &ShadowSettings,
) -> LightVolume {
    let tight = Aabb::from_corners(corners).padded(DEGENERATE_EPSILON);
    let (mut min, mut max) = fit_window(corners, &tight, settings.fixed_size_frustum);

    let snapper = TexelSnapper::new(max - min, settings.resolution);
    if settings.snap_to_texel {
        (min, max) = snapper.snap(min, max);
    }
    let texel_size = (max - min) / snapper.resolution() as f32;

    let (z_min, z_max) = fit_depth(settings.near_far_fit, &tight, scene, min, max);

    LightVolume {
        min,
        max,
        z_min,
        z_max,
        texel_size,
    }
}

/// X/Y window around `corners`.
///
/// The fixed-size window is a square whose side is the diameter of the
/// slice. That diameter does not change when the viewer rotates, so the
/// window size and texel quantum stay constant from frame to frame.
fn fit_window(corners: &[Vec3; 8], tight: &Aabb, fixed_size: bool) -> (Vec2, Vec2) {
    if !fixed_size {
        return (tight.min.truncate(), tight.max.truncate());
    }
    let half = slice_diameter(corners) * 0.5;
    let center = tight.center().truncate();
    let (x0, x1) = pad_interval(center.x - half, center.x + half, DEGENERATE_EPSILON);
    let (y0, y1) = pad_interval(center.y - half, center.y + half, DEGENERATE_EPSILON);
    (Vec2::new(x0, y0), Vec2::new(x1, y1))
}

/// Largest corner-to-corner distance of a frustum slice in
/// [`perspective_slice_corners`](umbra_math::perspective_slice_corners)
/// order. For a symmetric slice it is either the far-plane diagonal or the
/// near-to-far cross diagonal.
pub fn slice_diameter(corners: &[Vec3; 8]) -> f32 {
    let far_diagonal = corners[4].distance(corners[6]);
    let cross_diagonal = corners[0].distance(corners[6]);
    far_diagonal.max(cross_diagonal)
}

/// Light-view z range `(z_min, z_max)` for the depth policy.
fn fit_depth(
    policy: NearFarFit,
    tight: &Aabb,
    scene: Option<&[Vec3; 8]>,
    min: Vec2,
    max: Vec2,
) -> (f32, f32) {
    let cascade_range = (tight.min.z, tight.max.z);
    let (lo, hi) = match (policy, scene) {
        (NearFarFit::ZeroOne, _) => (-1.0, 0.0),
        (NearFarFit::CascadeAabb, _) | (_, None) => cascade_range,
        (NearFarFit::SceneAabb, Some(scene)) => {
            let bounds = Aabb::from_corners(scene);
            (bounds.min.z, bounds.max.z)
        }
        (NearFarFit::SceneIntersection, Some(scene)) => {
            clipped_z_range(scene, min, max).unwrap_or(cascade_range)
        }
    };
    pad_range(lo, hi)
}

fn pad_range(lo: f32, hi: f32) -> (f32, f32) {
    if !(lo.is_finite() && hi.is_finite()) {
        return (-DEGENERATE_EPSILON, 0.0);
    }
    pad_interval(lo, hi, DEGENERATE_EPSILON)
}
