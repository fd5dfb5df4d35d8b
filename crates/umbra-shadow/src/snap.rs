//! Texel snapping of cascade windows.
//!
//! A window is moved so its center sits on a multiple of the texel
//! quantum, and grown by one texel so the snapped window still contains the
//! original. With a constant quantum the rasterized texel grid stays fixed
//! in light space while the viewer moves, which removes edge shimmer.

use glam::Vec2;
use umbra_math::DEGENERATE_EPSILON;

use crate::settings::MIN_RESOLUTION;

/// Quantizes light-space windows to a texel grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexelSnapper {
    quantum: Vec2,
    resolution: u32,
}

impl TexelSnapper {
    /// Snapper for windows of `size` light-space units rendered at
    /// `resolution` texels.
    ///
    /// The quantum is `size / (resolution - 1)` so that the one-texel growth
    /// of [`snap`](Self::snap) lands exactly on `resolution` texels.
    pub fn new(size: Vec2, resolution: u32) -> Self {
        let resolution = resolution.max(MIN_RESOLUTION);
        let size = Vec2::new(sanitize_extent(size.x), sanitize_extent(size.y));
        Self {
            quantum: size / (resolution - 1) as f32,
            resolution,
        }
    }

    /// Light-space units covered by one texel on each axis.
    pub fn quantum(&self) -> Vec2 {
        self.quantum
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Snap the window `[min, max]`.
    ///
    /// The result spans exactly `resolution` texels, its center is an
    /// integer multiple of the quantum, and it contains the input window as
    /// long as the input is no larger than the size this snapper was built
    /// for. Snapping a snapped window again returns it unchanged.
    pub fn snap(&self, min: Vec2, max: Vec2) -> (Vec2, Vec2) {
        let center = (min + max) * 0.5;
        let snapped_center = (center / self.quantum).round() * self.quantum;
        let half = self.quantum * self.resolution as f32 * 0.5;
        (snapped_center - half, snapped_center + half)
    }
}

fn sanitize_extent(extent: f32) -> f32 {
    if extent.is_finite() {
        extent.abs().max(DEGENERATE_EPSILON)
    } else {
        DEGENERATE_EPSILON
    }
}
