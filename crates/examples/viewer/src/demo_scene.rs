use scene::{ImageData, ResourceId};

pub struct GeneratedTexture {
    pub id: ResourceId,
    pub data: ImageData,
}

/// Procedural checkerboard so the demo has a textured surface without any
/// asset files on disk.
pub fn checkerboard(size: u32, cell: u32) -> GeneratedTexture {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);

    for y in 0..size {
        for x in 0..size {
            let odd = ((x / cell) + (y / cell)) % 2 == 1;
            let value = if odd { 40 } else { 220 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }

    GeneratedTexture {
        id: ResourceId::new(),
        data: ImageData::new(size, size, pixels),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_alternates_cells() {
        let texture = checkerboard(64, 8);
        assert_eq!(texture.data.pixels.len(), 64 * 64 * 4);

        let px = |x: u32, y: u32| texture.data.pixels[((y * 64 + x) * 4) as usize];
        assert_ne!(px(0, 0), px(8, 0));
        assert_eq!(px(0, 0), px(16, 0));
    }
}
