use glam::{Mat4, Vec4};
use scene::Scene;
use vulkan::{CommandBuffer, DescriptorSet};

pub const MAX_LIGHTS: usize = 10;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PointLightData {
    pub position: Vec4,
    /// w carries the intensity.
    pub color: Vec4,
}

/// Global uniform block bound to every pass at set 0, binding 0.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GlobalUbo {
    pub projection: Mat4,
    pub view: Mat4,
    pub inverse_view: Mat4,
    pub ambient_light_color: Vec4,
    pub point_lights: [PointLightData; MAX_LIGHTS],
    pub num_lights: i32,
    pub frame_count: u32,
    _pad: [u32; 2],
}

impl Default for GlobalUbo {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            inverse_view: Mat4::IDENTITY,
            ambient_light_color: Vec4::new(0.67, 0.85, 0.9, 0.02),
            point_lights: [PointLightData::default(); MAX_LIGHTS],
            num_lights: 0,
            frame_count: 0,
            _pad: [0; 2],
        }
    }
}

/// Per-frame context threaded through every pass.
pub struct FrameInfo<'a> {
    pub frame_index: usize,
    pub frame_time: f32,
    pub cmd: &'a CommandBuffer,
    pub global_set: &'a DescriptorSet,
    pub scene: &'a Scene,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ubo_is_std140_sized() {
        // three mat4s, ambient, ten lights, counts + padding
        let expected = 3 * 64 + 16 + MAX_LIGHTS * 32 + 16;
        assert_eq!(std::mem::size_of::<GlobalUbo>(), expected);
        assert_eq!(std::mem::size_of::<GlobalUbo>() % 16, 0);
    }

    #[test]
    fn default_ambient_matches_engine_default() {
        let ubo = GlobalUbo::default();
        assert!((ubo.ambient_light_color.w - 0.02).abs() < f32::EPSILON);
        assert_eq!(ubo.num_lights, 0);
    }
}
