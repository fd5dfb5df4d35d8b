use glam::{Mat4, Vec3};

/// Smallest extent an axis may have before [`Aabb::padded`] widens it.
pub const DEGENERATE_EPSILON: f32 = 1e-4;

/// Padding floor relative to coordinate magnitude. Far from the origin an
/// absolute epsilon is below the f32 spacing and would be rounded away.
const RELATIVE_PAD: f32 = f32::EPSILON * 16.0;

/// Widen `[lo, hi]` symmetrically so its extent is at least `epsilon`, or a
/// few ulps of the endpoint magnitude when that is larger. The padded ends
/// are always distinct for finite input.
pub fn pad_interval(lo: f32, hi: f32, epsilon: f32) -> (f32, f32) {
    let (lo, hi) = (lo.min(hi), lo.max(hi));
    let min_extent = epsilon.max(lo.abs().max(hi.abs()) * RELATIVE_PAD);
    let grow = (min_extent - (hi - lo)).max(0.0) * 0.5;
    (lo - grow, hi + grow)
}

/// Axis-aligned bounding box in f32 space.
///
/// Invariant: min.x <= max.x, min.y <= max.y, min.z <= max.z.
/// The constructor enforces this by swapping components if needed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner of the bounding box.
    pub min: Vec3,
    /// Maximum corner of the bounding box.
    pub max: Vec3,
}

impl Aabb {
    /// Create an AABB from two corners, sorting components per axis.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Create an AABB from a center point and half-extents.
    pub fn from_center_half_extents(center: Vec3, half: Vec3) -> Self {
        Self::new(center - half, center + half)
    }

    /// Tightest box around a point set, `None` when the set is empty.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Vec3>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self { min, max })
    }

    /// Returns the center point of the AABB.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Full size along each axis.
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// The 8 corners. Bit 0 selects x, bit 1 selects y, bit 2 selects z
    /// (0 = min, 1 = max).
    pub fn corners(&self) -> [Vec3; 8] {
        std::array::from_fn(|i| {
            Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }

    /// Returns true if the point lies inside or on the boundary.
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Returns true if this AABB overlaps `other` (touching counts).
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Overlap of both boxes, `None` when they are disjoint.
    pub fn intersection(&self, other: &Aabb) -> Option<Aabb> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        min.cmple(max).all().then_some(Aabb { min, max })
    }

    /// Tightest box around 8 corners of an oriented box or frustum slice.
    pub fn from_corners(corners: &[Vec3; 8]) -> Aabb {
        let mut out = Aabb {
            min: corners[0],
            max: corners[0],
        };
        for c in &corners[1..] {
            out.min = out.min.min(*c);
            out.max = out.max.max(*c);
        }
        out
    }

    /// Box enclosing all 8 corners after an affine transform.
    pub fn transformed(&self, m: &Mat4) -> Aabb {
        Aabb::from_corners(&self.corners().map(|c| m.transform_point3(c)))
    }

    /// True when any axis is thinner than [`DEGENERATE_EPSILON`].
    pub fn is_degenerate(&self) -> bool {
        self.size().min_element() < DEGENERATE_EPSILON
    }

    /// Widen every axis thinner than `epsilon` symmetrically, per
    /// [`pad_interval`].
    ///
    /// Non-finite components are replaced by a box around the origin so the
    /// result is always usable as a projection volume.
    pub fn padded(&self, epsilon: f32) -> Aabb {
        if !(self.min.is_finite() && self.max.is_finite()) {
            return Aabb::from_center_half_extents(Vec3::ZERO, Vec3::splat(epsilon * 0.5));
        }
        let [x, y, z] = [0, 1, 2].map(|axis| pad_interval(self.min[axis], self.max[axis], epsilon));
        Aabb {
            min: Vec3::new(x.0, y.0, z.0),
            max: Vec3::new(x.1, y.1, z.1),
        }
    }
}
