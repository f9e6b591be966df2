use anyhow::Result;
use scene::{ImageData, ResourceId};
use vulkan::ash::vk;
use vulkan::{Context, DescriptorAllocatorGrowable, DescriptorSet, DescriptorSetLayout};

use crate::{RegistryIndex, Texture2D};

pub const WHITE_TEXTURE_ALIAS: &str = "white";
pub const FLAT_NORMAL_TEXTURE_ALIAS: &str = "flat_normal";
pub const GREY_TEXTURE_ALIAS: &str = "grey";

const TEXTURE_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::FRAGMENT.as_raw()
        | vk::ShaderStageFlags::RAYGEN_KHR.as_raw()
        | vk::ShaderStageFlags::CLOSEST_HIT_KHR.as_raw(),
);

/// All sampled 2D textures behind one bindless combined-image-sampler array.
/// Append-only after startup; indices stay stable for the renderer's life.
pub struct TextureRegistry {
    textures: Vec<Texture2D>,
    lookup: RegistryIndex,
    layout: Option<DescriptorSetLayout>,
    set: Option<DescriptorSet>,
}

impl TextureRegistry {
    /// Registers the default resources the fallback contract depends on:
    /// slot 0 is a 1x1 white texture, slot 1 a flat normal, slot 2 mid grey.
    pub fn new(context: &Context) -> Result<Self> {
        let mut registry = Self {
            textures: vec![],
            lookup: RegistryIndex::default(),
            layout: None,
            set: None,
        };

        registry.add(
            context,
            &ImageData::solid([255, 255, 255, 255]),
            Some(WHITE_TEXTURE_ALIAS),
        )?;
        registry.add(
            context,
            &ImageData::solid([128, 128, 255, 255]),
            Some(FLAT_NORMAL_TEXTURE_ALIAS),
        )?;
        registry.add(
            context,
            &ImageData::solid([128, 128, 128, 255]),
            Some(GREY_TEXTURE_ALIAS),
        )?;

        Ok(registry)
    }

    pub fn add(
        &mut self,
        context: &Context,
        data: &ImageData,
        alias: Option<&str>,
    ) -> Result<u32> {
        let texture = Texture2D::from_image_data(context, data)?;
        Ok(self.push(texture, ResourceId::new(), alias))
    }

    pub fn add_with_id(
        &mut self,
        context: &Context,
        id: ResourceId,
        data: &ImageData,
        alias: Option<&str>,
    ) -> Result<u32> {
        let texture = Texture2D::from_image_data(context, data)?;
        Ok(self.push(texture, id, alias))
    }

    /// Nearest/unnormalized sampling, used by the blue-noise stack.
    pub fn add_unnormalized(
        &mut self,
        context: &Context,
        data: &ImageData,
        alias: Option<&str>,
    ) -> Result<u32> {
        let texture = Texture2D::from_image_data_unnormalized(context, data)?;
        Ok(self.push(texture, ResourceId::new(), alias))
    }

    fn push(&mut self, texture: Texture2D, id: ResourceId, alias: Option<&str>) -> u32 {
        let index = self.textures.len() as u32;
        self.textures.push(texture);
        self.lookup.insert(id, alias, index);
        index
    }

    pub fn get_index(&self, id: ResourceId) -> u32 {
        self.lookup.index_of(id)
    }

    pub fn get_index_by_alias(&self, alias: &str) -> u32 {
        self.lookup.index_of_alias(alias)
    }

    pub fn count(&self) -> u32 {
        self.textures.len() as u32
    }

    /// Builds the bindless array descriptor once every startup texture is
    /// registered.
    pub fn build_descriptor_set(
        &mut self,
        context: &Context,
        allocator: &mut DescriptorAllocatorGrowable,
    ) -> Result<()> {
        let layout = context
            .descriptor_set_layout_builder()
            .add_bindless_binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                TEXTURE_STAGES,
                self.count(),
            )
            .build()?;

        let set = allocator.allocate(&layout)?;

        let entries = self
            .textures
            .iter()
            .map(|t| {
                (
                    &t.view,
                    &t.sampler,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )
            })
            .collect::<Vec<_>>();
        set.update_texture_array(0, &entries);

        self.layout = Some(layout);
        self.set = Some(set);

        Ok(())
    }

    pub fn descriptor_set_layout(&self) -> &DescriptorSetLayout {
        self.layout
            .as_ref()
            .expect("texture registry descriptor set not built yet")
    }

    pub fn descriptor_set(&self) -> &DescriptorSet {
        self.set
            .as_ref()
            .expect("texture registry descriptor set not built yet")
    }
}
