//! Synthetic caster scene: a ground slab with a grid of boxes on top.

use glam::{Mat4, Vec3};
use umbra_config::SceneConfig;
use umbra_math::Aabb;
use umbra_render::CasterVertex;
use umbra_shadow::Cascade;

/// One box of the scene: the transform applied to the unit cube and its
/// world bounds.
#[derive(Debug, Clone, Copy)]
pub struct SceneBox {
    pub transform: Mat4,
    pub bounds: Aabb,
}

impl SceneBox {
    fn new(min: Vec3, max: Vec3) -> Self {
        let center = (min + max) * 0.5;
        Self {
            transform: Mat4::from_scale_rotation_translation(max - min, glam::Quat::IDENTITY, center),
            bounds: Aabb::new(min, max),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub ground: SceneBox,
    pub boxes: Vec<SceneBox>,
    bounds: Aabb,
}

impl SyntheticScene {
    pub fn from_config(config: &SceneConfig) -> Self {
        let bounds = config.bounds();
        let ground = SceneBox::new(bounds.min, Vec3::new(bounds.max.x, bounds.min.y + 1.0, bounds.max.z));
        let floor = ground.bounds.max.y;

        let grid = config.grid.max(1);
        let size = config.box_size.max(0.1);
        let extent = bounds.max - bounds.min;
        let mut boxes = Vec::with_capacity((grid * grid) as usize);
        for j in 0..grid {
            for i in 0..grid {
                let x = bounds.min.x + extent.x * (i as f32 + 0.5) / grid as f32;
                let z = bounds.min.z + extent.z * (j as f32 + 0.5) / grid as f32;
                let height = (size * (1 + (i + j) % 3) as f32).min(bounds.max.y - floor);
                let half = Vec3::new(size * 0.5, 0.0, size * 0.5);
                boxes.push(SceneBox::new(
                    Vec3::new(x, floor, z) - half,
                    Vec3::new(x, floor + height, z) + half,
                ));
            }
        }

        Self { ground, boxes, bounds }
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Indices of the boxes overlapping `cascade`'s light volume.
    pub fn visible_boxes<'a>(&'a self, cascade: &'a Cascade) -> impl Iterator<Item = usize> + 'a {
        self.boxes
            .iter()
            .enumerate()
            .filter(move |(_, b)| cascade.intersects_aabb(&b.bounds))
            .map(|(i, _)| i)
    }
}

/// Unit cube centred on the origin with outward counter-clockwise faces.
pub fn unit_cube() -> (Vec<CasterVertex>, Vec<u32>) {
    let vertices = (0..8)
        .map(|i| {
            let coord = |bit: u32| if i & bit != 0 { 0.5 } else { -0.5 };
            CasterVertex::new([coord(1), coord(2), coord(4)], [0.0, 0.0])
        })
        .collect();
    let indices = vec![
        1, 3, 7, 1, 7, 5, // +x
        0, 6, 2, 0, 4, 6, // -x
        2, 6, 7, 2, 7, 3, // +y
        0, 1, 5, 0, 5, 4, // -y
        4, 5, 7, 4, 7, 6, // +z
        0, 3, 1, 0, 2, 3, // -z
    ];
    (vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_config::Config;
    use umbra_shadow::compute_cascades;

    #[test]
    fn test_boxes_stand_on_ground_inside_bounds() {
        let config = SceneConfig::default();
        let scene = SyntheticScene::from_config(&config);
        assert_eq!(scene.boxes.len(), (config.grid * config.grid) as usize);
        for b in &scene.boxes {
            assert_eq!(b.bounds.min.y, scene.ground.bounds.max.y);
            let inside = scene.bounds().contains_point(b.bounds.min) && scene.bounds().contains_point(b.bounds.max);
            assert!(inside, "box {:?} leaves the scene", b.bounds);
        }
    }

    #[test]
    fn test_transform_maps_unit_cube_onto_bounds() {
        let scene = SyntheticScene::from_config(&SceneConfig::default());
        let b = scene.boxes[0];
        let corner = b.transform.transform_point3(Vec3::splat(0.5));
        assert!((corner - b.bounds.max).length() < 1e-4);
    }

    #[test]
    fn test_near_cascade_culls_distant_boxes() {
        let config = Config::default();
        let scene = SyntheticScene::from_config(&config.scene);
        let cascades = compute_cascades(
            &config.viewer.to_camera(),
            &config.light.to_camera(),
            Some(&scene.bounds()),
            &config.shadows,
        );

        let nearest: Vec<usize> = scene.visible_boxes(&cascades.cascades()[0]).collect();
        assert!(
            nearest.len() < scene.boxes.len(),
            "the nearest cascade should not cover the whole {} m scene",
            scene.bounds().size().x
        );
        for cascade in &cascades {
            for i in scene.visible_boxes(cascade) {
                assert!(cascade.intersects_aabb(&scene.boxes[i].bounds));
            }
        }
        let any_visible = cascades.iter().any(|c| scene.visible_boxes(c).next().is_some());
        assert!(any_visible, "boxes in front of the viewer must reach some cascade");
    }

    #[test]
    fn test_unit_cube_winding_faces_outward() {
        let (vertices, indices) = unit_cube();
        for tri in indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(vertices[i as usize].position));
            let normal = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(normal.dot(centroid) > 0.0, "triangle {tri:?} faces inward");
        }
    }
}
