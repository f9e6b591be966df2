use glam::{Mat3, Mat4, Vec3};

/// Translation, scale and Tait-Bryan Y(1) X(2) Z(3) rotation.
///
/// `mat4` corresponds to `Translate * Ry * Rx * Rz * Scale`; read right to
/// left for the extrinsic interpretation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub scale: Vec3,
    pub rotation: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation: Vec3::ZERO,
        }
    }
}

impl Transform {
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    pub fn new(translation: Vec3, scale: Vec3, rotation: Vec3) -> Self {
        Self {
            translation,
            scale,
            rotation,
        }
    }

    pub fn mat4(&self) -> Mat4 {
        let c3 = self.rotation.z.cos();
        let s3 = self.rotation.z.sin();
        let c2 = self.rotation.x.cos();
        let s2 = self.rotation.x.sin();
        let c1 = self.rotation.y.cos();
        let s1 = self.rotation.y.sin();

        Mat4::from_cols_array(&[
            self.scale.x * (c1 * c3 + s1 * s2 * s3),
            self.scale.x * (c2 * s3),
            self.scale.x * (c1 * s2 * s3 - c3 * s1),
            0.0,
            self.scale.y * (c3 * s1 * s2 - c1 * s3),
            self.scale.y * (c2 * c3),
            self.scale.y * (c1 * c3 * s2 + s1 * s3),
            0.0,
            self.scale.z * (c2 * s1),
            self.scale.z * (-s2),
            self.scale.z * (c1 * c2),
            0.0,
            self.translation.x,
            self.translation.y,
            self.translation.z,
            1.0,
        ])
    }

    /// Rotation combined with inverse scale, for transforming normals.
    pub fn normal_matrix(&self) -> Mat3 {
        let c3 = self.rotation.z.cos();
        let s3 = self.rotation.z.sin();
        let c2 = self.rotation.x.cos();
        let s2 = self.rotation.x.sin();
        let c1 = self.rotation.y.cos();
        let s1 = self.rotation.y.sin();
        let inv_scale = 1.0 / self.scale;

        Mat3::from_cols_array(&[
            inv_scale.x * (c1 * c3 + s1 * s2 * s3),
            inv_scale.x * (c2 * s3),
            inv_scale.x * (c1 * s2 * s3 - c3 * s1),
            inv_scale.y * (c3 * s1 * s2 - c1 * s3),
            inv_scale.y * (c2 * c3),
            inv_scale.y * (c1 * c3 * s2 + s1 * s3),
            inv_scale.z * (c2 * s1),
            inv_scale.z * (-s2),
            inv_scale.z * (c1 * c2),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{EulerRot, Quat, Vec4};

    fn assert_mat4_eq(a: Mat4, b: Mat4) {
        for (x, y) in a.to_cols_array().iter().zip(b.to_cols_array().iter()) {
            assert!((x - y).abs() < 1e-5, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn identity_for_default_transform() {
        assert_mat4_eq(Transform::default().mat4(), Mat4::IDENTITY);
    }

    #[test]
    fn matches_translate_rotate_scale_composition() {
        let t = Transform::new(
            Vec3::new(1.0, -2.0, 3.0),
            Vec3::new(2.0, 0.5, 1.5),
            Vec3::new(0.3, 1.2, -0.7),
        );

        let rot = Quat::from_euler(EulerRot::YXZ, t.rotation.y, t.rotation.x, t.rotation.z);
        let expected = Mat4::from_translation(t.translation)
            * Mat4::from_quat(rot)
            * Mat4::from_scale(t.scale);

        assert_mat4_eq(t.mat4(), expected);
    }

    #[test]
    fn normal_matrix_preserves_normals_under_nonuniform_scale() {
        let t = Transform::new(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0), Vec3::ZERO);

        // y normal of a surface stretched along x is unchanged
        let n = t.normal_matrix() * Vec3::Y;
        assert!((n.normalize() - Vec3::Y).length() < 1e-6);

        // transformed tangent stays perpendicular to the transformed normal
        let tangent = (t.mat4() * Vec4::new(1.0, 0.0, 0.0, 0.0)).truncate();
        assert!(tangent.dot(t.normal_matrix() * Vec3::Y).abs() < 1e-6);
    }
}
