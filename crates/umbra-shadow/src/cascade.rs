//! Per-frame cascade construction.
//!
//! [`compute_cascades`] is a pure function of the viewer, the light, the
//! scene bounds and the settings. It partitions the viewer depth range,
//! fits and snaps one orthographic light volume per interval, and derives
//! everything the caster pass and the shading pass need from it.

use glam::{Mat4, Vec2, Vec3};
use umbra_math::{Aabb, Frustum, perspective_slice_corners};

use crate::camera::{LightCamera, ViewerCamera};
use crate::fit::{LightVolume, fit_cascade};
use crate::partition::{CascadeInterval, CascadePartition, partition};
use crate::settings::{ShadowSettings, XyFit};

/// Pixel rectangle a cascade renders into within its slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One fitted cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct Cascade {
    /// Slice index, 0 nearest the viewer.
    pub index: usize,
    /// Eye-depth interval this cascade is selected for.
    pub interval: CascadeInterval,
    /// World-to-light-view transform shared by all cascades.
    pub light_view: Mat4,
    /// Orthographic projection of this cascade's light volume.
    pub projection: Mat4,
    /// `projection * light_view`.
    pub view_projection: Mat4,
    /// Light-view volume the projection was built from.
    pub volume: LightVolume,
    /// World-space corners of the light volume, in
    /// [`Aabb::corners`] order.
    pub world_corners: [Vec3; 8],
    pub viewport: Viewport,
    /// Scale from light-view position to (u, v, depth) shadow coordinates.
    pub uv_scale: Vec3,
    /// Offset from light-view position to (u, v, depth) shadow coordinates.
    pub uv_offset: Vec3,
}

impl Cascade {
    /// Light-view bounding box of the cascade volume.
    pub fn light_bounds(&self) -> Aabb {
        self.volume.bounds()
    }

    /// World units covered by one shadow texel.
    pub fn texel_size(&self) -> Vec2 {
        self.volume.texel_size
    }

    /// Six planes of the light volume in world space, for caster culling.
    pub fn culling_frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection)
    }

    /// Whether a world-space box can cast into this cascade.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.light_bounds().intersects(&aabb.transformed(&self.light_view))
    }

    /// Whether a world-space sphere can cast into this cascade.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        let c = self.light_view.transform_point3(center);
        let bounds = self.light_bounds();
        let closest = c.clamp(bounds.min, bounds.max);
        closest.distance_squared(c) <= radius * radius
    }

    /// Shadow-map coordinates (u, v, depth) of a world-space point.
    ///
    /// u and v follow the texture convention (v grows downward); depth is 0
    /// at the side of the volume nearest the light.
    pub fn shadow_coord(&self, world: Vec3) -> Vec3 {
        self.light_view.transform_point3(world) * self.uv_scale + self.uv_offset
    }
}

/// Texel density report for one cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeStats {
    pub index: usize,
    pub near: f32,
    pub far: f32,
    /// World units per texel along the coarser axis.
    pub texel_world_size: f32,
    /// World-space extent of the light window.
    pub coverage: Vec2,
    /// Light-view depth range of the volume.
    pub depth_range: f32,
}

/// The fitted cascades of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeSet {
    cascades: Vec<Cascade>,
    partition: CascadePartition,
    light_view: Mat4,
    resolution: u32,
}

impl CascadeSet {
    pub fn cascades(&self) -> &[Cascade] {
        &self.cascades
    }

    pub fn get(&self, index: usize) -> Option<&Cascade> {
        self.cascades.get(index)
    }

    pub fn len(&self) -> usize {
        self.cascades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cascades.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cascade> {
        self.cascades.iter()
    }

    pub fn partition(&self) -> &CascadePartition {
        &self.partition
    }

    pub fn light_view(&self) -> Mat4 {
        self.light_view
    }

    /// Slice resolution the cascades were fitted for.
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn stats(&self) -> Vec<CascadeStats> {
        self.cascades
            .iter()
            .map(|c| {
                let coverage = c.volume.max - c.volume.min;
                CascadeStats {
                    index: c.index,
                    near: c.interval.near,
                    far: c.interval.far,
                    texel_world_size: c.volume.texel_size.max_element(),
                    coverage,
                    depth_range: c.volume.z_max - c.volume.z_min,
                }
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a CascadeSet {
    type Item = &'a Cascade;
    type IntoIter = std::slice::Iter<'a, Cascade>;

    fn into_iter(self) -> Self::IntoIter {
        self.cascades.iter()
    }
}

/// Build the cascades for one frame.
///
/// Settings are sanitized on the way in, so any `ShadowSettings` is
/// accepted. `scene` is the world-space box of everything that can cast or
/// receive shadows; without it the scene-based depth policies fall back to
/// the cascade's own depth range.
pub fn compute_cascades(
    viewer: &ViewerCamera,
    light: &LightCamera,
    scene: Option<&Aabb>,
    settings: &ShadowSettings,
) -> CascadeSet {
    let settings = settings.sanitized();
    let (near, far) = viewer.depth_range();
    let fov_y = if viewer.fov_y.is_finite() {
        viewer.fov_y.clamp(1e-3, std::f32::consts::PI - 1e-3)
    } else {
        std::f32::consts::FRAC_PI_4
    };
    let aspect = if viewer.aspect.is_finite() && viewer.aspect > 0.0 {
        viewer.aspect
    } else {
        1.0
    };

    let partition = partition(near, far, &settings.split_percentages);
    let view_to_light = light.view * viewer.inverse_view();
    let light_to_world = light.view.inverse();
    let scene_light = scene.map(|b| b.corners().map(|c| light.view.transform_point3(c)));

    let cascades = partition
        .intervals()
        .enumerate()
        .map(|(index, interval)| {
            let cover_near = match settings.xy_fit {
                XyFit::Cascade => interval.near,
                XyFit::Scene => partition.near(),
            };
            let corners = perspective_slice_corners(fov_y, aspect, cover_near, interval.far)
                .map(|c| view_to_light.transform_point3(c));
            let volume = fit_cascade(&corners, scene_light.as_ref(), &settings);
            let cascade = build_cascade(
                index,
                interval,
                light.view,
                light_to_world,
                volume,
                settings.resolution,
            );
            log::trace!(
                "cascade {index}: [{:.2}, {:.2}] window {:?} texel {:.4}",
                interval.near,
                interval.far,
                volume.max - volume.min,
                volume.texel_size.max_element()
            );
            cascade
        })
        .collect();

    CascadeSet {
        cascades,
        partition,
        light_view: light.view,
        resolution: settings.resolution,
    }
}

fn build_cascade(
    index: usize,
    interval: CascadeInterval,
    light_view: Mat4,
    light_to_world: Mat4,
    volume: LightVolume,
    resolution: u32,
) -> Cascade {
    let projection = volume.projection();
    // Orthographic: clip = diag(scale) * p + offset, then NDC to texture space.
    let uv_scale = Vec3::new(
        0.5 * projection.x_axis.x,
        -0.5 * projection.y_axis.y,
        projection.z_axis.z,
    );
    let uv_offset = Vec3::new(
        0.5 * projection.w_axis.x + 0.5,
        -0.5 * projection.w_axis.y + 0.5,
        projection.w_axis.z,
    );
    Cascade {
        index,
        interval,
        light_view,
        projection,
        view_projection: projection * light_view,
        volume,
        world_corners: volume
            .bounds()
            .corners()
            .map(|c| light_to_world.transform_point3(c)),
        viewport: Viewport {
            x: 0,
            y: 0,
            width: resolution,
            height: resolution,
        },
        uv_scale,
        uv_offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::NearFarFit;
    use umbra_math::{box_triangles, clip_polygon_to_rect};

    fn viewer() -> ViewerCamera {
        ViewerCamera::look_at(
            Vec3::new(5.0, 8.0, 20.0),
            Vec3::new(0.0, 0.0, 0.0),
            std::f32::consts::FRAC_PI_3,
            16.0 / 9.0,
            0.5,
            120.0,
        )
    }

    fn light() -> LightCamera {
        LightCamera::directional(Vec3::new(0.4, -1.0, 0.25))
    }

    fn scene() -> Aabb {
        Aabb::new(Vec3::new(-60.0, -2.0, -60.0), Vec3::new(60.0, 25.0, 60.0))
    }

    fn assert_inside_clip(cascade: &Cascade, light_point: Vec3, check_depth: bool, what: &str) {
        let clip = cascade.projection.project_point3(light_point);
        let eps = 1e-3;
        assert!(
            clip.x.abs() <= 1.0 + eps && clip.y.abs() <= 1.0 + eps,
            "cascade {} {what} x/y outside window: {clip}",
            cascade.index
        );
        if check_depth {
            assert!(
                clip.z >= -eps && clip.z <= 1.0 + eps,
                "cascade {} {what} depth outside [0,1]: {}",
                cascade.index,
                clip.z
            );
        }
    }

    /// Light-view corners each cascade is required to cover on x/y.
    fn required_corners(
        set: &CascadeSet,
        viewer: &ViewerCamera,
        settings: &ShadowSettings,
        cascade: &Cascade,
    ) -> [Vec3; 8] {
        let cover_near = match settings.xy_fit {
            XyFit::Cascade => cascade.interval.near,
            XyFit::Scene => set.partition().near(),
        };
        let to_light = set.light_view() * viewer.inverse_view();
        perspective_slice_corners(viewer.fov_y, viewer.aspect, cover_near, cascade.interval.far)
            .map(|c| to_light.transform_point3(c))
    }

    fn check_containment(settings: &ShadowSettings) {
        let viewer = viewer();
        let light = light();
        let scene = scene();
        let set = compute_cascades(&viewer, &light, Some(&scene), settings);
        let scene_light = scene.corners().map(|c| light.view.transform_point3(c));

        for cascade in &set {
            let corners = required_corners(&set, &viewer, settings, cascade);
            let depth_from_corners = matches!(settings.near_far_fit, NearFarFit::CascadeAabb);
            for c in corners {
                assert_inside_clip(cascade, c, depth_from_corners, "corner");
            }
            match settings.near_far_fit {
                NearFarFit::ZeroOne => {
                    let near = cascade.projection.project_point3(Vec3::ZERO).z;
                    let far = cascade.projection.project_point3(Vec3::NEG_Z).z;
                    assert!(near.abs() < 1e-5 && (far - 1.0).abs() < 1e-5);
                }
                NearFarFit::CascadeAabb => {}
                NearFarFit::SceneAabb => {
                    for c in scene_light {
                        let z = cascade.projection.project_point3(c).z;
                        assert!((-1e-3..=1.0 + 1e-3).contains(&z), "scene corner depth {z}");
                    }
                }
                NearFarFit::SceneIntersection => {
                    let v = &cascade.volume;
                    let mut any = false;
                    for tri in box_triangles(&scene_light) {
                        for p in clip_polygon_to_rect(&tri, v.min, v.max) {
                            any = true;
                            assert_inside_clip(cascade, p, true, "scene intersection point");
                        }
                    }
                    if !any {
                        for c in corners {
                            assert_inside_clip(cascade, c, true, "fallback corner");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_containment_all_policies() {
        for near_far_fit in [
            NearFarFit::ZeroOne,
            NearFarFit::CascadeAabb,
            NearFarFit::SceneAabb,
            NearFarFit::SceneIntersection,
        ] {
            for xy_fit in [XyFit::Cascade, XyFit::Scene] {
                for fixed_size_frustum in [false, true] {
                    for snap_to_texel in [false, true] {
                        let settings = ShadowSettings {
                            near_far_fit,
                            xy_fit,
                            fixed_size_frustum,
                            snap_to_texel,
                            ..Default::default()
                        };
                        check_containment(&settings);
                    }
                }
            }
        }
    }

    #[test]
    fn test_three_cascades_tight_fit() {
        // Near 1, far 101, weights (0.1, 0.4, 1.0), tight cascade fit.
        let viewer = ViewerCamera::look_at(Vec3::ZERO, Vec3::NEG_Z, 1.0, 1.0, 1.0, 101.0);
        let settings = ShadowSettings {
            cascade_count: 3,
            split_percentages: vec![0.1, 0.4, 1.0],
            near_far_fit: NearFarFit::CascadeAabb,
            fixed_size_frustum: false,
            snap_to_texel: false,
            ..Default::default()
        };
        let set = compute_cascades(&viewer, &LightCamera::directional(Vec3::NEG_Y), None, &settings);
        let expected = [1.0, 11.0, 41.0, 101.0];
        for (got, want) in set.partition().boundaries().iter().zip(expected) {
            assert!((got - want).abs() < 1e-3, "boundary {got} != {want}");
        }
        for cascade in &set {
            let corners = perspective_slice_corners(1.0, 1.0, cascade.interval.near, cascade.interval.far)
                .map(|c| (set.light_view() * viewer.inverse_view()).transform_point3(c));
            let tight = Aabb::from_corners(&corners);
            let bounds = cascade.light_bounds();
            assert!((tight.min - bounds.min).abs().max_element() < 1e-3);
            assert!((tight.max - bounds.max).abs().max_element() < 1e-3);
        }
    }

    #[test]
    fn test_fixed_size_window_translation_stable() {
        // Moving the viewer by less than a texel leaves every window in place;
        // whole-texel motion shifts it by whole texels.
        let settings = ShadowSettings {
            fixed_size_frustum: true,
            snap_to_texel: true,
            resolution: 1024,
            near_far_fit: NearFarFit::CascadeAabb,
            ..Default::default()
        };
        let light = LightCamera::directional(Vec3::NEG_Y);
        let base_viewer = ViewerCamera::look_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0), 1.0, 1.0, 0.5, 200.0);
        let base = compute_cascades(&base_viewer, &light, None, &settings);

        for cascade in &base {
            let q = cascade.texel_size();
            // The light looks straight down, so world x motion is light-view x motion.
            let nudge = Vec3::new(q.x * 0.25, 0.0, 0.0);
            let moved_viewer = ViewerCamera::look_at(nudge, nudge + Vec3::NEG_Z, 1.0, 1.0, 0.5, 200.0);
            let moved = compute_cascades(&moved_viewer, &light, None, &settings);
            let m = &moved.cascades()[cascade.index];
            let delta = (m.volume.min - cascade.volume.min) / q;
            assert!(
                (delta.x - delta.x.round()).abs() < 1e-2 && (delta.y - delta.y.round()).abs() < 1e-2,
                "cascade {} window moved by a fraction of a texel: {delta}",
                cascade.index
            );
            assert!(
                ((m.volume.max - m.volume.min) - (cascade.volume.max - cascade.volume.min))
                    .abs()
                    .max_element()
                    < 1e-3,
                "window size changed"
            );
        }
    }

    #[test]
    fn test_scene_aabb_depth_identical_across_cascades() {
        let settings = ShadowSettings {
            near_far_fit: NearFarFit::SceneAabb,
            ..Default::default()
        };
        let set = compute_cascades(&viewer(), &light(), Some(&scene()), &settings);
        let first = &set.cascades()[0].volume;
        for cascade in &set {
            assert_eq!(cascade.volume.z_min, first.z_min);
            assert_eq!(cascade.volume.z_max, first.z_max);
        }
    }

    #[test]
    fn test_scene_aabb_depth_spans_scene_height_under_top_down_light() {
        let settings = ShadowSettings {
            cascade_count: 4,
            near_far_fit: NearFarFit::SceneAabb,
            ..Default::default()
        };
        let bounds = Aabb::new(Vec3::splat(-50.0), Vec3::splat(50.0));
        let top_down = LightCamera::directional(Vec3::NEG_Y);
        let set = compute_cascades(&viewer(), &top_down, Some(&bounds), &settings);
        assert_eq!(set.len(), 4);
        for cascade in &set {
            let depth = cascade.volume.z_max - cascade.volume.z_min;
            assert!(
                (depth - 100.0).abs() < 1e-3,
                "cascade {} light-space depth {depth} != 100",
                cascade.index
            );
            assert_eq!(cascade.volume.z_min, set.cascades()[0].volume.z_min);
            assert_eq!(cascade.volume.z_max, set.cascades()[0].volume.z_max);
        }
    }

    #[test]
    fn test_xy_fit_scene_covers_from_viewer_near() {
        let settings = ShadowSettings {
            xy_fit: XyFit::Scene,
            fixed_size_frustum: false,
            snap_to_texel: false,
            near_far_fit: NearFarFit::CascadeAabb,
            ..Default::default()
        };
        let viewer = viewer();
        let set = compute_cascades(&viewer, &light(), None, &settings);
        let to_light = set.light_view() * viewer.inverse_view();
        let near_corners = perspective_slice_corners(viewer.fov_y, viewer.aspect, viewer.near, viewer.near)
            .map(|c| to_light.transform_point3(c));
        let last = &set.cascades()[set.len() - 1];
        for c in near_corners {
            assert_inside_clip(last, c, false, "viewer near corner");
        }
    }

    #[test]
    fn test_shadow_coord_matches_projection() {
        let set = compute_cascades(&viewer(), &light(), Some(&scene()), &ShadowSettings::default());
        let world = Vec3::new(1.0, 2.0, 3.0);
        for cascade in &set {
            let clip = cascade.view_projection.project_point3(world);
            let coord = cascade.shadow_coord(world);
            assert!((coord.x - (clip.x * 0.5 + 0.5)).abs() < 1e-4);
            assert!((coord.y - (0.5 - clip.y * 0.5)).abs() < 1e-4);
            assert!((coord.z - clip.z).abs() < 1e-4);
        }
    }

    #[test]
    fn test_culling_helpers_agree_on_obvious_cases() {
        let set = compute_cascades(&viewer(), &light(), Some(&scene()), &ShadowSettings::default());
        let first = &set.cascades()[0];
        let center = Aabb::from_corners(&first.world_corners).center();
        let inside = Aabb::from_center_half_extents(center, Vec3::splat(0.1));
        let far_away = Aabb::from_center_half_extents(Vec3::splat(10_000.0), Vec3::splat(0.1));
        assert!(first.intersects_aabb(&inside));
        assert!(first.culling_frustum().intersects_aabb(&inside));
        assert!(first.intersects_sphere(center, 0.1));
        assert!(!first.intersects_aabb(&far_away));
        assert!(!first.culling_frustum().intersects_aabb(&far_away));
        assert!(!first.intersects_sphere(Vec3::splat(10_000.0), 1.0));
    }

    #[test]
    fn test_stats_texel_density_grows_with_distance() {
        let set = compute_cascades(&viewer(), &light(), Some(&scene()), &ShadowSettings::default());
        let stats = set.stats();
        assert_eq!(stats.len(), 4);
        for pair in stats.windows(2) {
            assert!(
                pair[1].texel_world_size > pair[0].texel_world_size,
                "farther cascades should have coarser texels"
            );
        }
    }

    #[test]
    fn test_degenerate_viewer_still_produces_finite_cascades() {
        let viewer = ViewerCamera::new(Mat4::IDENTITY, f32::NAN, 0.0, 0.0, 0.0);
        let set = compute_cascades(&viewer, &light(), None, &ShadowSettings::default());
        assert_eq!(set.len(), 4);
        for cascade in &set {
            assert!(cascade.view_projection.is_finite(), "cascade {} not finite", cascade.index);
        }
    }

    #[test]
    fn test_point_scene_far_from_origin_stays_finite() {
        let origin = Vec3::splat(1e5);
        let viewer = ViewerCamera::look_at(origin + Vec3::new(0.0, 2.0, 10.0), origin, 1.0, 1.0, 0.5, 50.0);
        let point = Aabb::new(origin, origin);
        let settings = ShadowSettings {
            near_far_fit: NearFarFit::SceneAabb,
            xy_fit: XyFit::Scene,
            ..Default::default()
        };
        let set = compute_cascades(&viewer, &LightCamera::directional(Vec3::NEG_Y), Some(&point), &settings);
        for cascade in &set {
            let volume = &cascade.volume;
            assert!(volume.z_max > volume.z_min, "cascade {} depth collapsed: {volume:?}", cascade.index);
            assert!(volume.max.cmpgt(volume.min).all(), "cascade {} window collapsed", cascade.index);
            assert!(cascade.projection.is_finite(), "cascade {} projection not finite", cascade.index);
            assert!(cascade.view_projection.is_finite());
        }
    }

    #[test]
    fn test_compute_is_pure() {
        let settings = ShadowSettings::default();
        let a = compute_cascades(&viewer(), &light(), Some(&scene()), &settings);
        let b = compute_cascades(&viewer(), &light(), Some(&scene()), &settings);
        assert_eq!(a, b);
    }
}
