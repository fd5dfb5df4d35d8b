//! f32 geometry primitives for the Umbra shadow workspace: boxes, frustum
//! planes, perspective slice corners and polygon clipping.

mod aabb;
pub mod clip;
mod frustum;

pub use aabb::{Aabb, DEGENERATE_EPSILON, pad_interval};
pub use clip::{aabb_clipped_z_range, box_triangles, clip_polygon_to_rect, clipped_z_range};
pub use frustum::{Frustum, perspective_slice_corners};
