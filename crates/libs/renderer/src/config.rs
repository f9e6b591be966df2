use anyhow::Result;
use vulkan::ash::vk;

/// Renderer options recognized at startup. Window options live with the shell.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub raytracing_enabled: bool,
    pub denoising_enabled: bool,
    /// Fixed by design; per-frame resource arrays are sized by it.
    pub max_frames_in_flight: usize,
    pub max_lights: usize,
    pub shadow_map_size: u32,
    pub density_volume_extent: vk::Extent3D,
    pub majorant_grid_extent: vk::Extent3D,
    pub blue_noise_count: u32,
    pub blue_noise_size: u32,
    /// Load pre-compiled `out/shaders/*.spv` instead of the SPIR-V compiled
    /// next to the sources under `assets/shaders/`.
    pub use_compiled_shaders: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            raytracing_enabled: true,
            denoising_enabled: true,
            max_frames_in_flight: vulkan::MAX_FRAMES_IN_FLIGHT,
            max_lights: crate::MAX_LIGHTS,
            shadow_map_size: 4096,
            density_volume_extent: vk::Extent3D {
                width: 256,
                height: 256,
                depth: 256,
            },
            majorant_grid_extent: vk::Extent3D {
                width: 32,
                height: 32,
                depth: 32,
            },
            blue_noise_count: 64,
            blue_noise_size: 128,
            use_compiled_shaders: true,
        }
    }
}

impl RenderConfig {
    /// Startup-fatal validation of the cross-option invariants.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.max_frames_in_flight == vulkan::MAX_FRAMES_IN_FLIGHT,
            "max_frames_in_flight is fixed at {}",
            vulkan::MAX_FRAMES_IN_FLIGHT
        );
        anyhow::ensure!(
            self.max_lights == crate::MAX_LIGHTS,
            "max_lights is bound to the UBO array size ({})",
            crate::MAX_LIGHTS
        );
        anyhow::ensure!(self.shadow_map_size > 0, "shadow map size cannot be zero");

        let d = self.density_volume_extent;
        let m = self.majorant_grid_extent;
        anyhow::ensure!(
            m.width > 0 && m.height > 0 && m.depth > 0,
            "majorant grid extent cannot be zero"
        );
        anyhow::ensure!(
            d.width % m.width == 0 && d.height % m.height == 0 && d.depth % m.depth == 0,
            "majorant grid extent must divide the density extent on every axis"
        );

        Ok(())
    }

    /// Density texels per majorant cell; also the generator's workgroup edge.
    pub fn majorant_cell_size(&self) -> u32 {
        self.density_volume_extent.width / self.majorant_grid_extent.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        RenderConfig::default().validate().unwrap();
    }

    #[test]
    fn majorant_grid_must_divide_density_extent() {
        let mut config = RenderConfig::default();
        config.majorant_grid_extent.width = 33;
        assert!(config.validate().is_err());
    }

    #[test]
    fn cell_size_is_the_extent_ratio() {
        assert_eq!(RenderConfig::default().majorant_cell_size(), 8);
    }
}
