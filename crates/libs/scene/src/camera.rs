use glam::{Mat4, Vec3};

/// Orthographic volume `(left, right, top, bottom)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrthoParams {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl Default for OrthoParams {
    fn default() -> Self {
        Self {
            left: -1.0,
            right: 1.0,
            top: -1.0,
            bottom: 1.0,
        }
    }
}

/// Projection and view matrices in Vulkan conventions: Y flipped relative to
/// GL, depth in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub fov_y_degrees: f32,
    pub ortho_params: OrthoParams,
    pub z_near: f32,
    pub z_far: f32,
    pub is_perspective: bool,
    projection: Mat4,
    view: Mat4,
    inverse_view: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov_y_degrees: 50.0,
            ortho_params: OrthoParams::default(),
            z_near: 0.1,
            z_far: 100.0,
            is_perspective: true,
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            inverse_view: Mat4::IDENTITY,
        }
    }
}

impl Camera {
    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn inverse_view(&self) -> Mat4 {
        self.inverse_view
    }

    pub fn position(&self) -> Vec3 {
        self.inverse_view.col(3).truncate()
    }

    pub fn update_projection(&mut self, aspect: f32) {
        if self.is_perspective {
            self.set_perspective(aspect);
        } else {
            self.set_orthographic();
        }
    }

    pub fn set_perspective(&mut self, aspect: f32) {
        assert!(aspect > f32::EPSILON, "aspect ratio must be positive");

        let tan_half_fovy = (self.fov_y_degrees.to_radians() / 2.0).tan();
        let mut m = Mat4::ZERO.to_cols_array_2d();
        m[0][0] = 1.0 / (aspect * tan_half_fovy);
        m[1][1] = 1.0 / tan_half_fovy;
        m[2][2] = self.z_far / (self.z_far - self.z_near);
        m[2][3] = 1.0;
        m[3][2] = -(self.z_far * self.z_near) / (self.z_far - self.z_near);
        self.projection = Mat4::from_cols_array_2d(&m);
    }

    pub fn set_orthographic(&mut self) {
        let OrthoParams {
            left,
            right,
            top,
            bottom,
        } = self.ortho_params;

        let mut m = Mat4::IDENTITY.to_cols_array_2d();
        m[0][0] = 2.0 / (right - left);
        m[1][1] = 2.0 / (bottom - top);
        m[2][2] = 1.0 / (self.z_far - self.z_near);
        m[3][0] = -(right + left) / (right - left);
        m[3][1] = -(bottom + top) / (bottom - top);
        m[3][2] = -self.z_near / (self.z_far - self.z_near);
        self.projection = Mat4::from_cols_array_2d(&m);
    }

    pub fn set_view_direction(&mut self, position: Vec3, direction: Vec3, up: Vec3) {
        assert!(
            direction.length_squared() > f32::EPSILON,
            "view direction cannot be zero"
        );

        let w = direction.normalize();
        let u = w.cross(up).normalize();
        let v = w.cross(u);

        self.update_view_matrix(u, v, w, position);
    }

    pub fn set_view_target(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        self.set_view_direction(position, target - position, up);
    }

    /// View from a position and the same YXZ Euler angles the transforms use.
    pub fn set_view_yxz(&mut self, position: Vec3, rotation: Vec3) {
        let c3 = rotation.z.cos();
        let s3 = rotation.z.sin();
        let c2 = rotation.x.cos();
        let s2 = rotation.x.sin();
        let c1 = rotation.y.cos();
        let s1 = rotation.y.sin();
        let u = Vec3::new(c1 * c3 + s1 * s2 * s3, c2 * s3, c1 * s2 * s3 - c3 * s1);
        let v = Vec3::new(c3 * s1 * s2 - c1 * s3, c2 * c3, c1 * c3 * s2 + s1 * s3);
        let w = Vec3::new(c2 * s1, -s2, c1 * c2);

        self.update_view_matrix(u, v, w, position);
    }

    fn update_view_matrix(&mut self, u: Vec3, v: Vec3, w: Vec3, position: Vec3) {
        let mut view = Mat4::IDENTITY.to_cols_array_2d();
        view[0][0] = u.x;
        view[1][0] = u.y;
        view[2][0] = u.z;
        view[0][1] = v.x;
        view[1][1] = v.y;
        view[2][1] = v.z;
        view[0][2] = w.x;
        view[1][2] = w.y;
        view[2][2] = w.z;
        view[3][0] = -u.dot(position);
        view[3][1] = -v.dot(position);
        view[3][2] = -w.dot(position);
        self.view = Mat4::from_cols_array_2d(&view);

        let mut inverse = Mat4::IDENTITY.to_cols_array_2d();
        inverse[0][0] = u.x;
        inverse[0][1] = u.y;
        inverse[0][2] = u.z;
        inverse[1][0] = v.x;
        inverse[1][1] = v.y;
        inverse[1][2] = v.z;
        inverse[2][0] = w.x;
        inverse[2][1] = w.y;
        inverse[2][2] = w.z;
        inverse[3][0] = position.x;
        inverse[3][1] = position.y;
        inverse[3][2] = position.z;
        self.inverse_view = Mat4::from_cols_array_2d(&inverse);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_times_inverse_is_identity() {
        let mut camera = Camera::default();
        camera.set_view_yxz(Vec3::new(1.0, 2.0, -3.0), Vec3::new(0.2, 0.8, -0.1));

        let product = camera.view() * camera.inverse_view();
        for (a, b) in product
            .to_cols_array()
            .iter()
            .zip(Mat4::IDENTITY.to_cols_array().iter())
        {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn position_comes_from_inverse_view() {
        let mut camera = Camera::default();
        let position = Vec3::new(4.0, -1.0, 7.5);
        camera.set_view_yxz(position, Vec3::ZERO);
        assert!((camera.position() - position).length() < 1e-6);
    }

    #[test]
    fn perspective_maps_near_to_zero_and_far_to_one() {
        let mut camera = Camera {
            z_near: 0.5,
            z_far: 50.0,
            ..Default::default()
        };
        camera.set_perspective(16.0 / 9.0);

        let near = camera.projection() * glam::Vec4::new(0.0, 0.0, 0.5, 1.0);
        let far = camera.projection() * glam::Vec4::new(0.0, 0.0, 50.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-6);
        assert!((far.z / far.w - 1.0).abs() < 1e-6);
    }
}
