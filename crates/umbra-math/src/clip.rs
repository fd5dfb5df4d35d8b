//! Polygon clipping against axis-aligned rectangles.
//!
//! Used to intersect a scene box with a cascade's light-space window and
//! recover the depth range actually occupied inside that window.

use glam::{Vec2, Vec3};

use crate::Aabb;

/// Corner indices (see [`Aabb::corners`]) of the 6 faces, as quads.
const FACES: [[usize; 4]; 6] = [
    [0, 2, 6, 4],
    [1, 3, 7, 5],
    [0, 1, 5, 4],
    [2, 3, 7, 6],
    [0, 1, 3, 2],
    [4, 5, 7, 6],
];

/// The 12 triangles of a box given its 8 corners in [`Aabb::corners`] order.
/// The corners may have been transformed, so the box may be oriented.
pub fn box_triangles(corners: &[Vec3; 8]) -> [[Vec3; 3]; 12] {
    let mut tris = [[Vec3::ZERO; 3]; 12];
    for (f, [a, b, c, d]) in FACES.iter().enumerate() {
        tris[f * 2] = [corners[*a], corners[*b], corners[*c]];
        tris[f * 2 + 1] = [corners[*a], corners[*c], corners[*d]];
    }
    tris
}

/// Sutherland-Hodgman clip of a convex polygon against one axis-aligned plane.
///
/// Keeps the half-space `p[axis] >= value` when `keep_greater`, otherwise
/// `p[axis] <= value`.
pub fn clip_polygon(poly: &[Vec3], axis: usize, value: f32, keep_greater: bool) -> Vec<Vec3> {
    let inside = |p: Vec3| {
        if keep_greater {
            p[axis] >= value
        } else {
            p[axis] <= value
        }
    };
    let mut out = Vec::with_capacity(poly.len() + 2);
    for (i, &current) in poly.iter().enumerate() {
        let previous = poly[(i + poly.len() - 1) % poly.len()];
        match (inside(previous), inside(current)) {
            (true, true) => out.push(current),
            (true, false) => out.push(crossing(previous, current, axis, value)),
            (false, true) => {
                out.push(crossing(previous, current, axis, value));
                out.push(current);
            }
            (false, false) => {}
        }
    }
    out
}

fn crossing(a: Vec3, b: Vec3, axis: usize, value: f32) -> Vec3 {
    let denom = b[axis] - a[axis];
    if denom.abs() <= f32::EPSILON {
        return a;
    }
    let t = (value - a[axis]) / denom;
    let mut p = a.lerp(b, t);
    p[axis] = value;
    p
}

/// Clip a polygon to the XY rectangle `[min, max]`, keeping all z values.
pub fn clip_polygon_to_rect(poly: &[Vec3], min: Vec2, max: Vec2) -> Vec<Vec3> {
    let mut out = poly.to_vec();
    for (axis, value, keep_greater) in [
        (0, min.x, true),
        (0, max.x, false),
        (1, min.y, true),
        (1, max.y, false),
    ] {
        if out.is_empty() {
            break;
        }
        out = clip_polygon(&out, axis, value, keep_greater);
    }
    out
}

/// Z range covered by the part of an oriented box that falls inside the XY
/// rectangle `[min, max]`. `None` when the box misses the rectangle.
pub fn clipped_z_range(corners: &[Vec3; 8], min: Vec2, max: Vec2) -> Option<(f32, f32)> {
    let mut range: Option<(f32, f32)> = None;
    for tri in box_triangles(corners) {
        for p in clip_polygon_to_rect(&tri, min, max) {
            range = Some(match range {
                Some((lo, hi)) => (lo.min(p.z), hi.max(p.z)),
                None => (p.z, p.z),
            });
        }
    }
    range
}

/// Convenience for an unrotated box.
pub fn aabb_clipped_z_range(aabb: &Aabb, min: Vec2, max: Vec2) -> Option<(f32, f32)> {
    clipped_z_range(&aabb.corners(), min, max)
}
