use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use vulkan::ash::vk;
use vulkan::{
    Buffer, Context, DescriptorAllocatorGrowable, DescriptorSet, DescriptorSetLayout,
    WriteDescriptorSet, WriteDescriptorSetKind,
};

use crate::{load_png, RenderConfig, TextureRegistry};

const BLUE_NOISE_DIR: &str = "assets/textures/blue_noise";
const SEARCH_PREFIXES: [&str; 3] = ["", ".", "../.."];

/// Spatio-temporal blue-noise slice file name for layer `i`.
pub fn blue_noise_file_name(size: u32, count: u32, index: u32) -> String {
    format!("stbn_unitvec2_2Dx1D_{size}x{size}x{count}_{index}.png")
}

/// The preloaded blue-noise texture stack: the textures live in the bindless
/// array, their registry indices in an SSBO the raygen shader reads.
pub struct BlueNoise {
    indices: Vec<u32>,
    _buffer: Buffer,
    layout: DescriptorSetLayout,
    set: DescriptorSet,
}

impl BlueNoise {
    pub fn load(
        context: &Context,
        allocator: &mut DescriptorAllocatorGrowable,
        textures: &mut TextureRegistry,
        config: &RenderConfig,
    ) -> Result<Self> {
        let mut indices = Vec::with_capacity(config.blue_noise_count as usize);

        for i in 0..config.blue_noise_count {
            let name = blue_noise_file_name(config.blue_noise_size, config.blue_noise_count, i);
            let path = resolve(&name)
                .with_context(|| format!("blue noise texture {name} not found"))?;
            let data = load_png(&path)?;
            let index = textures.add_unnormalized(context, &data, None)?;
            indices.push(index);
        }

        log::info!("Registered {} blue noise textures", indices.len());

        let upload: &[u32] = if indices.is_empty() { &[0] } else { &indices };
        let buffer = vulkan::utils::create_gpu_only_buffer_from_data(
            context,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            upload,
        )?;

        let layout = context
            .descriptor_set_layout_builder()
            .add_binding(
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::RAYGEN_KHR,
            )
            .build()?;
        let set = allocator.allocate(&layout)?;
        set.update(&[WriteDescriptorSet {
            binding: 0,
            kind: WriteDescriptorSetKind::StorageBuffer { buffer: &buffer },
        }]);

        Ok(Self {
            indices,
            _buffer: buffer,
            layout,
            set,
        })
    }

    pub fn count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn layout(&self) -> &DescriptorSetLayout {
        &self.layout
    }

    pub fn descriptor_set(&self) -> &DescriptorSet {
        &self.set
    }
}

fn resolve(name: &str) -> Result<PathBuf> {
    for prefix in SEARCH_PREFIXES {
        let candidate = Path::new(prefix).join(BLUE_NOISE_DIR).join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    anyhow::bail!("{name} not found under {BLUE_NOISE_DIR}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_follow_the_asset_pattern() {
        assert_eq!(
            blue_noise_file_name(128, 64, 0),
            "stbn_unitvec2_2Dx1D_128x128x64_0.png"
        );
        assert_eq!(
            blue_noise_file_name(128, 64, 63),
            "stbn_unitvec2_2Dx1D_128x128x64_63.png"
        );
    }
}
