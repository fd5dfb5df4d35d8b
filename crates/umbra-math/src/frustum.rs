//! Frustum planes and perspective slice corners.
//!
//! Planes are extracted from a view-projection matrix with the wgpu clip
//! convention (x, y in [-1, 1], z in [0, 1]). Casters are culled against
//! a cascade's frustum before they are drawn into its shadow slice.

use glam::{Mat4, Vec3, Vec4};

use crate::Aabb;

/// Plane indices into the frustum planes array.
const LEFT: usize = 0;
const RIGHT: usize = 1;
const BOTTOM: usize = 2;
const TOP: usize = 3;
const NEAR: usize = 4;
const FAR: usize = 5;

/// A frustum defined by six inward-pointing planes.
#[derive(Clone, Debug, PartialEq)]
pub struct Frustum {
    /// Six planes: left, right, bottom, top, near, far.
    /// Each `Vec4(a, b, c, d)` where `(a,b,c)` is the normalized inward
    /// normal and `d` is the signed distance term.
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extract frustum planes from a combined view-projection matrix
    /// using the Gribb-Hartmann method.
    ///
    /// Works with both perspective and orthographic projections whose
    /// depth range is [0, 1].
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];

        let mut planes = [Vec4::ZERO; 6];
        planes[LEFT] = rows[3] + rows[0];
        planes[RIGHT] = rows[3] - rows[0];
        planes[BOTTOM] = rows[3] + rows[1];
        planes[TOP] = rows[3] - rows[1];
        planes[NEAR] = rows[2];
        planes[FAR] = rows[3] - rows[2];

        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 0.0 {
                *plane /= len;
            }
        }

        Self { planes }
    }

    /// The six planes in left, right, bottom, top, near, far order.
    pub fn planes(&self) -> &[Vec4; 6] {
        &self.planes
    }

    /// Test whether an AABB is at least partially inside the frustum.
    ///
    /// Uses the positive-vertex test: conservative near frustum corners,
    /// never rejects a box that is visible.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let normal = plane.truncate();
            let p = Vec3::select(normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            normal.dot(p) + plane.w >= 0.0
        })
    }

    /// Test whether a sphere is at least partially inside the frustum.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }
}

/// View-space corners of the perspective frustum slice between `near` and
/// `far` (positive eye depths) for a right-handed camera looking down -Z.
///
/// Order: near plane (bottom-left, bottom-right, top-right, top-left),
/// then the far plane in the same order.
pub fn perspective_slice_corners(fov_y: f32, aspect: f32, near: f32, far: f32) -> [Vec3; 8] {
    let tan_y = (fov_y * 0.5).tan();
    let tan_x = tan_y * aspect;
    let plane = |d: f32| {
        [
            Vec3::new(-tan_x * d, -tan_y * d, -d),
            Vec3::new(tan_x * d, -tan_y * d, -d),
            Vec3::new(tan_x * d, tan_y * d, -d),
            Vec3::new(-tan_x * d, tan_y * d, -d),
        ]
    };
    let [n0, n1, n2, n3] = plane(near);
    let [f0, f1, f2, f3] = plane(far);
    [n0, n1, n2, n3, f0, f1, f2, f3]
}
