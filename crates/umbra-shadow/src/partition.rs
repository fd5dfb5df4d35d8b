//! Splitting the viewer's depth range into cascade intervals.

use crate::settings::MAX_CASCADES;

/// One cascade's eye-depth interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeInterval {
    pub near: f32,
    pub far: f32,
}

impl CascadeInterval {
    pub fn length(&self) -> f32 {
        self.far - self.near
    }

    /// Half-open membership test, `near <= depth < far`.
    pub fn contains(&self, depth: f32) -> bool {
        depth >= self.near && depth < self.far
    }
}

/// Ordered cascade boundaries covering `[near, far]`.
///
/// Holds `N + 1` boundaries for `N` cascades: the first equals the viewer's
/// near distance and the last its far distance.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadePartition {
    boundaries: Vec<f32>,
}

impl CascadePartition {
    /// All `N + 1` boundaries in increasing order.
    pub fn boundaries(&self) -> &[f32] {
        &self.boundaries
    }

    pub fn cascade_count(&self) -> usize {
        self.boundaries.len() - 1
    }

    pub fn near(&self) -> f32 {
        self.boundaries[0]
    }

    pub fn far(&self) -> f32 {
        self.boundaries[self.boundaries.len() - 1]
    }

    /// Interval of cascade `index`, clamped to the last cascade.
    pub fn interval(&self, index: usize) -> CascadeInterval {
        let i = index.min(self.cascade_count() - 1);
        CascadeInterval {
            near: self.boundaries[i],
            far: self.boundaries[i + 1],
        }
    }

    pub fn intervals(&self) -> impl Iterator<Item = CascadeInterval> + '_ {
        self.boundaries.windows(2).map(|w| CascadeInterval {
            near: w[0],
            far: w[1],
        })
    }
}

/// Split `[near, far]` using per-cascade weights.
///
/// Interior boundary `i` is `near + weights[i] * (far - near)`. A boundary
/// that would fall below its predecessor is clamped to it; one beyond `far`
/// is clamped to `far`. The final boundary is `far` whatever the last
/// weight says. An empty weight list yields a single cascade. A reversed
/// range is swapped; a non-finite `near` becomes 0 and a non-finite `far`
/// collapses onto `near`.
pub fn partition(near: f32, far: f32, weights: &[f32]) -> CascadePartition {
    let count = weights.len().clamp(1, MAX_CASCADES);
    let near = if near.is_finite() { near } else { 0.0 };
    let far = if far.is_finite() { far } else { near };
    let (near, far) = (near.min(far), near.max(far));
    let range = far - near;

    let mut boundaries = Vec::with_capacity(count + 1);
    boundaries.push(near);
    let mut previous = near;
    for &w in weights.iter().take(count - 1) {
        let w = if w.is_finite() { w } else { 0.0 };
        let boundary = (near + w * range).clamp(previous, far);
        boundaries.push(boundary);
        previous = boundary;
    }
    boundaries.push(far);

    CascadePartition { boundaries }
}

/// Weights for the "practical" split scheme: a `lambda` blend between a
/// logarithmic and a uniform split of `[near, far]`.
///
/// `lambda = 1` is fully logarithmic, `lambda = 0` fully uniform. The
/// returned weights feed [`partition`] and end with `1.0`.
pub fn practical_split_weights(count: usize, near: f32, far: f32, lambda: f32) -> Vec<f32> {
    let count = count.clamp(1, MAX_CASCADES);
    let near = near.max(1e-4);
    let far = far.max(near + 1e-3);
    let lambda = lambda.clamp(0.0, 1.0);
    let range = far - near;
    let ratio = far / near;

    (1..=count)
        .map(|i| {
            let p = i as f32 / count as f32;
            let log_split = near * ratio.powf(p);
            let uniform_split = near + range * p;
            let split = lambda * log_split + (1.0 - lambda) * uniform_split;
            ((split - near) / range).clamp(0.0, 1.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_cascade_boundaries() {
        let p = partition(1.0, 101.0, &[0.1, 0.4, 1.0]);
        assert_eq!(p.cascade_count(), 3);
        let expected = [1.0, 11.0, 41.0, 101.0];
        for (got, want) in p.boundaries().iter().zip(expected) {
            assert!((got - want).abs() < 1e-4, "boundary {got} != {want}");
        }
    }

    #[test]
    fn test_four_cascades_over_long_range() {
        let p = partition(0.5, 300.0, &[0.04, 0.10, 0.25, 1.0]);
        assert_eq!(p.cascade_count(), 4);
        let expected = [0.5, 12.48, 30.45, 75.375, 300.0];
        for (got, want) in p.boundaries().iter().zip(expected) {
            assert!((got - want).abs() < 1e-3, "boundary {got} != {want}");
        }
    }

    #[test]
    fn test_reversed_range_is_ordered() {
        let p = partition(10.0, 1.0, &[0.5, 1.0]);
        assert_eq!(p.boundaries(), &[1.0, 5.5, 10.0]);
    }

    #[test]
    fn test_non_finite_range_does_not_panic() {
        for (near, far) in [(1.0, f32::NAN), (f32::NAN, 5.0), (f32::INFINITY, f32::NEG_INFINITY)] {
            let p = partition(near, far, &[0.3, 0.6, 1.0]);
            assert_eq!(p.cascade_count(), 3);
            assert!(
                p.boundaries().iter().all(|b| b.is_finite()),
                "non-finite boundary for ({near}, {far}): {:?}",
                p.boundaries()
            );
            assert!(p.boundaries().windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_boundaries_strictly_increasing_for_increasing_weights() {
        let p = partition(0.5, 500.0, &[0.05, 0.15, 0.4, 1.0]);
        for pair in p.boundaries().windows(2) {
            assert!(pair[0] < pair[1], "{:?}", p.boundaries());
        }
        assert_eq!(p.near(), 0.5);
        assert_eq!(p.far(), 500.0);
    }

    #[test]
    fn test_decreasing_weight_clamped_to_previous() {
        let p = partition(0.0, 100.0, &[0.5, 0.2, 1.0]);
        assert_eq!(p.boundaries()[1], 50.0);
        assert_eq!(p.boundaries()[2], 50.0, "violation clamps to previous boundary");
        assert_eq!(p.boundaries()[3], 100.0);
    }

    #[test]
    fn test_last_boundary_is_far_regardless_of_weight() {
        let p = partition(1.0, 10.0, &[0.5, 0.7]);
        assert_eq!(p.far(), 10.0);
        let overshoot = partition(1.0, 10.0, &[2.0, 3.0]);
        assert_eq!(overshoot.boundaries(), &[1.0, 10.0, 10.0]);
    }

    #[test]
    fn test_single_cascade() {
        let p = partition(0.1, 50.0, &[1.0]);
        assert_eq!(p.boundaries(), &[0.1, 50.0]);
        let empty = partition(0.1, 50.0, &[]);
        assert_eq!(empty.cascade_count(), 1);
    }

    #[test]
    fn test_intervals_tile_range() {
        let p = partition(1.0, 100.0, &[0.1, 0.3, 0.6, 1.0]);
        let intervals: Vec<_> = p.intervals().collect();
        assert_eq!(intervals.len(), 4);
        for pair in intervals.windows(2) {
            assert_eq!(pair[0].far, pair[1].near);
        }
        assert!(intervals[1].contains(p.boundaries()[1]));
        assert!(!intervals[0].contains(p.boundaries()[1]));
    }

    #[test]
    fn test_practical_weights_between_uniform_and_log() {
        let uniform = practical_split_weights(4, 1.0, 1000.0, 0.0);
        let log = practical_split_weights(4, 1.0, 1000.0, 1.0);
        let mixed = practical_split_weights(4, 1.0, 1000.0, 0.5);
        assert!((uniform[0] - 0.25).abs() < 1e-4);
        assert!(log[0] < uniform[0], "log split should be tighter near the eye");
        assert!(mixed[0] > log[0] && mixed[0] < uniform[0]);
        for w in [&uniform, &log, &mixed] {
            assert!((w[3] - 1.0).abs() < 1e-4);
            for pair in w.windows(2) {
                assert!(pair[0] < pair[1]);
            }
        }
    }
}
