use glam::Vec4;

/// Decoded RGBA8 pixels, the shape the importer collaborator produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImageData {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        assert_eq!(pixels.len(), (width * height * 4) as usize);
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Single-pixel solid color, used for the default registry slots.
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: rgba.to_vec(),
        }
    }
}

/// Cube faces in the +X, -X, +Y, -Y, +Z, -Z order Vulkan expects.
pub const SKYBOX_FACE_COUNT: usize = 6;

pub struct Environment {
    pub ambient_light: Vec4,
    pub skybox_faces: [ImageData; SKYBOX_FACE_COUNT],
}

impl Environment {
    pub fn new(ambient_light: Vec4, skybox_faces: [ImageData; SKYBOX_FACE_COUNT]) -> Self {
        let face = &skybox_faces[0];
        assert_eq!(face.width, face.height, "cube faces must be square");
        for other in &skybox_faces[1..] {
            assert_eq!(other.width, face.width);
            assert_eq!(other.height, face.height);
        }

        Self {
            ambient_light,
            skybox_faces,
        }
    }

    /// Flat grey sky, handy for scenes loaded without an environment.
    pub fn default_grey() -> Self {
        let faces =
            std::array::from_fn(|_| ImageData::solid([96, 108, 120, 255]));
        Self::new(Vec4::new(0.67, 0.85, 0.9, 0.02), faces)
    }

    pub fn face_size(&self) -> u32 {
        self.skybox_faces[0].width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_environment_has_matching_faces() {
        let env = Environment::default_grey();
        assert_eq!(env.face_size(), 1);
        assert_eq!(env.skybox_faces.len(), SKYBOX_FACE_COUNT);
    }

    #[test]
    #[should_panic]
    fn mismatched_face_sizes_are_rejected() {
        let mut faces: Vec<ImageData> =
            (0..6).map(|_| ImageData::solid([0, 0, 0, 255])).collect();
        faces[3] = ImageData::new(2, 2, vec![0; 16]);
        let faces: [ImageData; 6] = faces.try_into().unwrap();
        Environment::new(Vec4::ZERO, faces);
    }
}
