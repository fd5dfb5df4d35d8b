//! Viewer and light cameras consumed by the cascade builder.

use glam::{Mat4, Vec3};

/// Perspective camera whose frustum the cascades partition.
///
/// Right-handed, looking down -Z in view space. Depths are positive eye
/// distances along the view direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerCamera {
    /// World-to-view transform.
    pub view: Mat4,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    /// Width / height.
    pub aspect: f32,
    /// Near clip distance (always positive).
    pub near: f32,
    /// Far clip distance (always positive, > near).
    pub far: f32,
}

impl ViewerCamera {
    pub fn new(view: Mat4, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            view,
            fov_y,
            aspect,
            near,
            far,
        }
    }

    /// Camera at `eye` looking at `target` with +Y up.
    pub fn look_at(eye: Vec3, target: Vec3, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        let forward = (target - eye).normalize_or(Vec3::NEG_Z);
        let up = if forward.y.abs() > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        Self::new(Mat4::look_at_rh(eye, eye + forward, up), fov_y, aspect, near, far)
    }

    /// View-to-world transform.
    pub fn inverse_view(&self) -> Mat4 {
        self.view.inverse()
    }

    /// World-space eye position.
    pub fn position(&self) -> Vec3 {
        self.inverse_view().w_axis.truncate()
    }

    /// World-space unit view direction.
    pub fn forward(&self) -> Vec3 {
        -self.inverse_view().z_axis.truncate().normalize_or(Vec3::Z)
    }

    /// Positive eye depth of a world-space point.
    pub fn eye_depth(&self, world: Vec3) -> f32 {
        -self.view.transform_point3(world).z
    }

    /// Projection with the wgpu [0, 1] depth convention.
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Clip distances forced into a usable range.
    pub(crate) fn depth_range(&self) -> (f32, f32) {
        let near = if self.near.is_finite() {
            self.near.max(1e-4)
        } else {
            1e-4
        };
        let far = if self.far.is_finite() {
            self.far.max(near + 1e-3)
        } else {
            near + 1e-3
        };
        (near, far)
    }
}

/// Directional light seen as an orthographic camera.
///
/// The view transform is shared by every cascade; cascades differ only in
/// their orthographic window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightCamera {
    /// World-to-light-view transform. The light shines down -Z.
    pub view: Mat4,
}

impl LightCamera {
    /// Light shining along `direction`, anchored at the world origin.
    ///
    /// The anchor does not move with the viewer, so the light-view basis is
    /// stable from frame to frame.
    pub fn directional(direction: Vec3) -> Self {
        Self::directional_at(Vec3::ZERO, direction)
    }

    /// Light shining along `direction` with its view origin at `anchor`.
    pub fn directional_at(anchor: Vec3, direction: Vec3) -> Self {
        let dir = direction.normalize_or(Vec3::NEG_Y);
        let up = if dir.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
        Self {
            view: Mat4::look_to_rh(anchor, dir, up),
        }
    }

    /// World-space unit direction the light travels in.
    pub fn direction(&self) -> Vec3 {
        -self.view.inverse().z_axis.truncate().normalize_or(Vec3::NEG_Y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eye_depth_positive_in_front() {
        let cam = ViewerCamera::look_at(
            Vec3::new(0.0, 2.0, 10.0),
            Vec3::new(0.0, 2.0, 0.0),
            1.0,
            1.0,
            0.1,
            100.0,
        );
        assert!((cam.eye_depth(Vec3::new(0.0, 2.0, 0.0)) - 10.0).abs() < 1e-4);
        assert!(cam.eye_depth(Vec3::new(0.0, 2.0, 20.0)) < 0.0);
    }

    #[test]
    fn test_forward_and_position() {
        let cam = ViewerCamera::look_at(Vec3::new(1.0, 2.0, 3.0), Vec3::new(1.0, 2.0, -7.0), 1.0, 1.0, 0.1, 10.0);
        assert!((cam.position() - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-4);
        assert!((cam.forward() - Vec3::NEG_Z).length() < 1e-4);
    }

    #[test]
    fn test_light_direction_roundtrip() {
        let dir = Vec3::new(0.3, -1.0, 0.2).normalize();
        let light = LightCamera::directional(dir);
        assert!((light.direction() - dir).length() < 1e-4);
        let straight_down = LightCamera::directional(Vec3::NEG_Y);
        assert!(straight_down.view.is_finite());
        assert!((straight_down.direction() - Vec3::NEG_Y).length() < 1e-4);
    }

    #[test]
    fn test_depth_range_repairs_bad_clip_planes() {
        let cam = ViewerCamera::new(Mat4::IDENTITY, 1.0, 1.0, -1.0, -5.0);
        let (near, far) = cam.depth_range();
        assert!(near > 0.0);
        assert!(far > near);
    }
}
