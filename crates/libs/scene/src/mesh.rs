use glam::{Vec2, Vec3};

use crate::ResourceId;

/// CPU-side vertex layout shared by the raster and ray-tracing paths. The
/// ray-tracing shaders index this struct through the vertex buffer device
/// address, so it is `repr(C)` and padded explicitly.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshVertex {
    pub position: Vec3,
    pub _pad0: f32,
    pub color: Vec3,
    pub _pad1: f32,
    pub normal: Vec3,
    pub _pad2: f32,
    pub uv: Vec2,
    pub _pad3: [f32; 2],
}

impl MeshVertex {
    pub fn new(position: Vec3, color: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            _pad0: 0.0,
            color,
            _pad1: 0.0,
            normal,
            _pad2: 0.0,
            uv,
            _pad3: [0.0; 2],
        }
    }
}

/// Geometry as the importer collaborator hands it over.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub id: ResourceId,
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<MeshVertex>, indices: Vec<u32>) -> Self {
        Self {
            id: ResourceId::new(),
            vertices,
            indices,
        }
    }

    pub fn triangle_count(&self) -> u32 {
        self.indices.len() as u32 / 3
    }

    /// Unit cube centered at the origin, one face per side, outward normals.
    pub fn cube() -> Self {
        let faces: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::X, Vec3::Y, Vec3::Z),
            (Vec3::NEG_X, Vec3::Y, Vec3::NEG_Z),
            (Vec3::Y, Vec3::Z, Vec3::X),
            (Vec3::NEG_Y, Vec3::NEG_Z, Vec3::X),
            (Vec3::Z, Vec3::Y, Vec3::NEG_X),
            (Vec3::NEG_Z, Vec3::Y, Vec3::X),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);

        for (face, (normal, up, right)) in faces.iter().enumerate() {
            let base = (face * 4) as u32;
            let center = *normal * 0.5;
            let corners = [
                center - *up * 0.5 - *right * 0.5,
                center - *up * 0.5 + *right * 0.5,
                center + *up * 0.5 + *right * 0.5,
                center + *up * 0.5 - *right * 0.5,
            ];
            let uvs = [
                Vec2::new(0.0, 1.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(0.0, 0.0),
            ];

            for (corner, uv) in corners.iter().zip(uvs.iter()) {
                vertices.push(MeshVertex::new(*corner, Vec3::ONE, *normal, *uv));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new(vertices, indices)
    }

    /// Unit quad in the XZ plane with a +Y normal.
    pub fn quad() -> Self {
        let normal = Vec3::Y;
        let vertices = vec![
            MeshVertex::new(Vec3::new(-0.5, 0.0, -0.5), Vec3::ONE, normal, Vec2::new(0.0, 0.0)),
            MeshVertex::new(Vec3::new(0.5, 0.0, -0.5), Vec3::ONE, normal, Vec2::new(1.0, 0.0)),
            MeshVertex::new(Vec3::new(0.5, 0.0, 0.5), Vec3::ONE, normal, Vec2::new(1.0, 1.0)),
            MeshVertex::new(Vec3::new(-0.5, 0.0, 0.5), Vec3::ONE, normal, Vec2::new(0.0, 1.0)),
        ];
        let indices = vec![0, 2, 1, 0, 3, 2];

        Self::new(vertices, indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_gpu_layout_compatible() {
        assert_eq!(std::mem::size_of::<MeshVertex>(), 64);
        assert_eq!(std::mem::size_of::<MeshVertex>() % 16, 0);
    }

    #[test]
    fn cube_has_twelve_triangles() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.triangle_count(), 12);
    }

    #[test]
    fn quad_has_two_triangles() {
        assert_eq!(MeshData::quad().triangle_count(), 2);
    }
}
