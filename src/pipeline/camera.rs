//! Perspective camera orbiting a target point
//!
//! The camera is stored in spherical coordinates around its target
//! (distance, azimuth, elevation) so orbit controls can rotate it without
//! drift. Matrices are column-major, right-handed, with clip-space depth in
//! [0, 1] as wgpu expects.

use std::f32::consts::{FRAC_PI_2, PI, TAU};

use crate::config::CameraConfig;

/// Closest the camera may get to its target
pub const MIN_DISTANCE: f32 = 1.0;

/// Elevation limit, just short of the poles so `look_at` keeps a valid up vector
const ELEVATION_LIMIT: f32 = FRAC_PI_2 - 0.01;

/// Column-major 4x4 matrix
pub type Mat4 = [[f32; 4]; 4];

/// Identity matrix
pub const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Perspective camera looking at `target` from a point on a sphere around it
#[derive(Debug, Clone, PartialEq)]
pub struct Camera3D {
    /// Distance from the target
    pub distance: f32,
    /// Angle around the vertical axis; 0 puts the camera on +Z
    pub azimuth: f32,
    /// Angle above the horizontal plane
    pub elevation: f32,
    /// Point the camera looks at
    pub target: [f32; 3],
    /// Vertical field of view, radians
    pub fov: f32,
    /// Width over height
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera3D {
    /// Place a camera at `config.position` looking at the origin
    pub fn from_config(config: &CameraConfig, aspect: f32) -> Self {
        let mut camera = Self {
            distance: MIN_DISTANCE,
            azimuth: 0.0,
            elevation: 0.0,
            target: [0.0; 3],
            fov: config.fov_degrees.to_radians(),
            aspect,
            near: config.near,
            far: config.far,
        };
        camera.set_position(config.position);
        camera
    }

    /// Move the eye to `position`, keeping the current target
    pub fn set_position(&mut self, position: [f32; 3]) {
        let offset = sub(position, self.target);
        let distance = length(offset).max(MIN_DISTANCE);
        self.distance = distance;
        self.elevation = (offset[1] / distance)
            .clamp(-1.0, 1.0)
            .asin()
            .clamp(-ELEVATION_LIMIT, ELEVATION_LIMIT);
        self.azimuth = offset[0].atan2(offset[2]);
    }

    /// Eye position in world space
    pub fn position(&self) -> [f32; 3] {
        let (sin_e, cos_e) = self.elevation.sin_cos();
        let (sin_a, cos_a) = self.azimuth.sin_cos();
        [
            self.target[0] + self.distance * cos_e * sin_a,
            self.target[1] + self.distance * sin_e,
            self.target[2] + self.distance * cos_e * cos_a,
        ]
    }

    /// World to camera space
    pub fn view_matrix(&self) -> Mat4 {
        look_at(self.position(), self.target, [0.0, 1.0, 0.0])
    }

    /// Camera to clip space
    pub fn projection_matrix(&self) -> Mat4 {
        perspective(self.fov, self.aspect, self.near, self.far)
    }

    /// Update the aspect ratio after a viewport change
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    /// Rotate around the target; elevation stops short of the poles
    pub fn orbit(&mut self, delta_azimuth: f32, delta_elevation: f32) {
        self.azimuth = (self.azimuth + delta_azimuth + PI).rem_euclid(TAU) - PI;
        self.elevation =
            (self.elevation + delta_elevation).clamp(-ELEVATION_LIMIT, ELEVATION_LIMIT);
    }

    /// Scale the distance to the target, clamped to `[MIN_DISTANCE, far]`
    pub fn dolly(&mut self, scale: f32) {
        self.distance = (self.distance * scale).clamp(MIN_DISTANCE, self.far);
    }

    /// Move the target along the camera's screen axes, in world units
    pub fn pan(&mut self, right_amount: f32, up_amount: f32) {
        let (right, up) = self.screen_axes();
        for axis in 0..3 {
            self.target[axis] += right[axis] * right_amount + up[axis] * up_amount;
        }
    }

    /// World-space right and up vectors of the current view
    pub fn screen_axes(&self) -> ([f32; 3], [f32; 3]) {
        let forward = normalize(sub(self.target, self.position()));
        let right = normalize(cross(forward, [0.0, 1.0, 0.0]));
        let up = cross(right, forward);
        (right, up)
    }
}

/// Right-handed look-at view matrix
pub fn look_at(eye: [f32; 3], target: [f32; 3], up: [f32; 3]) -> Mat4 {
    let f = normalize(sub(target, eye));
    let s = normalize(cross(f, up));
    let u = cross(s, f);
    [
        [s[0], u[0], -f[0], 0.0],
        [s[1], u[1], -f[1], 0.0],
        [s[2], u[2], -f[2], 0.0],
        [-dot(s, eye), -dot(u, eye), dot(f, eye), 1.0],
    ]
}

/// Right-handed perspective projection with depth mapped to [0, 1]
pub fn perspective(fov: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let f = 1.0 / (fov / 2.0).tan();
    let range = near - far;
    [
        [f / aspect, 0.0, 0.0, 0.0],
        [0.0, f, 0.0, 0.0],
        [0.0, 0.0, far / range, -1.0],
        [0.0, 0.0, near * far / range, 0.0],
    ]
}

/// Rotation about the vertical axis
pub fn rotation_y(angle: f32) -> Mat4 {
    let (s, c) = angle.sin_cos();
    [
        [c, 0.0, -s, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [s, 0.0, c, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Apply a column-major matrix to a point (w = 1)
pub fn transform_point(m: &Mat4, p: [f32; 3]) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (row, value) in out.iter_mut().enumerate() {
        *value = m[0][row] * p[0] + m[1][row] * p[1] + m[2][row] * p[2] + m[3][row];
    }
    out
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn length(v: [f32; 3]) -> f32 {
    dot(v, v).sqrt()
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = length(v);
    if len > 1e-10 {
        [v[0] / len, v[1] / len, v[2] / len]
    } else {
        [0.0, 0.0, 1.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn starts_at_the_configured_position() {
        let camera = Camera3D::from_config(&CameraConfig::default(), 4.0 / 3.0);
        let [x, y, z] = camera.position();
        assert!(close(x, 1.0, 1e-3), "x = {}", x);
        assert!(close(y, 0.0, 1e-3), "y = {}", y);
        assert!(close(z, 1000.0, 1e-2), "z = {}", z);
        assert!(close(camera.fov, 75f32.to_radians(), 1e-6));
        assert_eq!(camera.near, 0.1);
        assert_eq!(camera.far, 5000.0);
    }

    #[test]
    fn target_lands_on_the_negative_z_axis_in_view_space() {
        let camera = Camera3D::from_config(&CameraConfig::default(), 1.0);
        let view = camera.view_matrix();
        let p = transform_point(&view, camera.target);
        assert!(close(p[0], 0.0, 1e-2));
        assert!(close(p[1], 0.0, 1e-2));
        assert!(close(p[2], -camera.distance, 1e-1));
    }

    #[test]
    fn projection_maps_near_and_far_to_unit_depth() {
        let proj = perspective(FRAC_PI_2, 2.0, 1.0, 100.0);
        let near = transform_point(&proj, [0.0, 0.0, -1.0]);
        let far = transform_point(&proj, [0.0, 0.0, -100.0]);
        assert!(close(near[2] / near[3], 0.0, 1e-5));
        assert!(close(far[2] / far[3], 1.0, 1e-5));
        // fov 90 degrees: f = 1, x scaled by 1 / aspect
        assert!(close(proj[0][0], 0.5, 1e-6));
        assert!(close(proj[1][1], 1.0, 1e-6));
    }

    #[test]
    fn set_aspect_changes_only_the_horizontal_scale() {
        let mut camera = Camera3D::from_config(&CameraConfig::default(), 400.0 / 300.0);
        let before = camera.projection_matrix();
        camera.set_aspect(800.0 / 600.0);
        assert_eq!(camera.projection_matrix(), before);
        camera.set_aspect(2.0);
        let after = camera.projection_matrix();
        assert!(after[0][0] < before[0][0]);
        assert_eq!(after[1][1], before[1][1]);
    }

    #[test]
    fn orbit_wraps_azimuth_and_clamps_elevation() {
        let mut camera = Camera3D::from_config(&CameraConfig::default(), 1.0);
        camera.orbit(7.0, 10.0);
        assert!(camera.azimuth >= -PI && camera.azimuth <= PI);
        assert!(camera.elevation < FRAC_PI_2);

        camera.orbit(-20.0, -20.0);
        assert!(camera.azimuth >= -PI && camera.azimuth <= PI);
        assert!(camera.elevation > -FRAC_PI_2);
    }

    #[test]
    fn dolly_respects_limits() {
        let mut camera = Camera3D::from_config(&CameraConfig::default(), 1.0);
        camera.dolly(1e-9);
        assert_eq!(camera.distance, MIN_DISTANCE);
        camera.dolly(1e9);
        assert_eq!(camera.distance, camera.far);
    }

    #[test]
    fn pan_moves_the_target_sideways() {
        let mut camera = Camera3D::from_config(&CameraConfig::default(), 1.0);
        camera.pan(10.0, 0.0);
        assert!(close(camera.target[0], 10.0, 1e-2));
        assert!(close(camera.target[1], 0.0, 1e-3));
    }

    #[test]
    fn rotation_y_turns_x_toward_minus_z() {
        let m = rotation_y(FRAC_PI_2);
        let p = transform_point(&m, [1.0, 0.0, 0.0]);
        assert!(close(p[0], 0.0, 1e-6));
        assert!(close(p[2], -1.0, 1e-6));
    }
}
