use anyhow::Result;
use glam::Vec4;
use scene::{MaterialDesc, ResourceId};
use vulkan::ash::vk;
use vulkan::gpu_allocator::MemoryLocation;
use vulkan::{
    Context, DescriptorAllocatorGrowable, DescriptorSet, DescriptorSetLayout, WriteDescriptorSet,
    WriteDescriptorSetKind, MAX_FRAMES_IN_FLIGHT,
};

use crate::{RegistryIndex, TextureRegistry};

/// Marks a texture slot as "unbound, use the scalar factor".
pub const UNBOUND_TEXTURE_INDEX: u32 = u32::MAX;

const MATERIAL_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::FRAGMENT.as_raw()
        | vk::ShaderStageFlags::RAYGEN_KHR.as_raw()
        | vk::ShaderStageFlags::CLOSEST_HIT_KHR.as_raw(),
);

/// Packed material record as the shaders read it from the SSBO.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MaterialData {
    pub albedo_color: Vec4,
    pub emissive_color: Vec4,
    pub albedo_idx: u32,
    pub normal_idx: u32,
    pub ao_idx: u32,
    pub metallic: f32,
    pub metallic_idx: u32,
    pub roughness: f32,
    pub roughness_idx: u32,
    pub emissive_idx: u32,
    pub transmission: f32,
    pub ior: f32,
    pub bp_specular_intensity: f32,
    pub bp_specular_shininess: f32,
}

fn texture_index(registry: &TextureRegistry, map: Option<ResourceId>) -> u32 {
    match map {
        Some(id) => registry.get_index(id),
        None => UNBOUND_TEXTURE_INDEX,
    }
}

pub fn pack_material(material: &MaterialDesc, textures: &TextureRegistry) -> MaterialData {
    MaterialData {
        albedo_color: material.albedo_color,
        emissive_color: material.emissive_color,
        albedo_idx: texture_index(textures, material.albedo_map),
        normal_idx: texture_index(textures, material.normal_map),
        ao_idx: texture_index(textures, material.ambient_occlusion_map),
        metallic: material.metallic,
        metallic_idx: texture_index(textures, material.metallic_map),
        roughness: material.roughness,
        roughness_idx: texture_index(textures, material.roughness_map),
        emissive_idx: texture_index(textures, material.emissive_map),
        transmission: material.transmission,
        ior: material.ior,
        bp_specular_intensity: material.bp_specular_intensity,
        bp_specular_shininess: material.bp_specular_shininess,
    }
}

/// Material records in one SSBO per frame in flight. Uploading into the slot
/// of the frame being recorded means an edit takes effect on exactly that
/// frame, never one the GPU is still reading.
pub struct MaterialRegistry {
    materials: Vec<MaterialDesc>,
    lookup: RegistryIndex,
    buffers: Vec<vulkan::Buffer>,
    layout: Option<DescriptorSetLayout>,
    sets: Vec<DescriptorSet>,
}

impl MaterialRegistry {
    /// Slot 0 is the default material so broken references degrade to plain
    /// white, mirroring the texture registry contract.
    pub fn new() -> Self {
        let mut registry = Self {
            materials: vec![],
            lookup: RegistryIndex::default(),
            buffers: vec![],
            layout: None,
            sets: vec![],
        };
        registry.add(MaterialDesc::default());
        registry
    }

    pub fn add(&mut self, material: MaterialDesc) -> u32 {
        let index = self.materials.len() as u32;
        self.lookup.insert(material.id, None, index);
        self.materials.push(material);
        index
    }

    pub fn get_index(&self, id: ResourceId) -> u32 {
        self.lookup.index_of(id)
    }

    pub fn get(&self, id: ResourceId) -> &MaterialDesc {
        &self.materials[self.get_index(id) as usize]
    }

    pub fn count(&self) -> u32 {
        self.materials.len() as u32
    }

    pub fn build_descriptor_sets(
        &mut self,
        context: &Context,
        allocator: &mut DescriptorAllocatorGrowable,
    ) -> Result<()> {
        let buffer_size =
            (std::mem::size_of::<MaterialData>() * self.materials.len()) as vk::DeviceSize;

        let layout = context
            .descriptor_set_layout_builder()
            .add_binding(0, vk::DescriptorType::STORAGE_BUFFER, MATERIAL_STAGES)
            .build()?;

        self.buffers.clear();
        self.sets.clear();
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let buffer = context.create_buffer(
                vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::STORAGE_BUFFER,
                MemoryLocation::GpuOnly,
                buffer_size,
            )?;

            let set = allocator.allocate(&layout)?;
            set.update(&[WriteDescriptorSet {
                binding: 0,
                kind: WriteDescriptorSetKind::StorageBuffer { buffer: &buffer },
            }]);

            self.buffers.push(buffer);
            self.sets.push(set);
        }

        self.layout = Some(layout);

        Ok(())
    }

    /// Re-uploads the packed records into the SSBO slot of the frame being
    /// recorded.
    pub fn update(
        &self,
        context: &Context,
        frame_index: usize,
        textures: &TextureRegistry,
    ) -> Result<()> {
        let records = self
            .materials
            .iter()
            .map(|m| pack_material(m, textures))
            .collect::<Vec<_>>();

        let staging = context.create_buffer(
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            (std::mem::size_of::<MaterialData>() * records.len()) as _,
        )?;
        staging.copy_data_to_buffer(&records)?;

        context.copy_buffer(&staging, &self.buffers[frame_index])?;

        Ok(())
    }

    pub fn descriptor_set_layout(&self) -> &DescriptorSetLayout {
        self.layout
            .as_ref()
            .expect("material registry descriptor sets not built yet")
    }

    pub fn descriptor_set(&self, frame_index: usize) -> &DescriptorSet {
        &self.sets[frame_index]
    }
}

impl Default for MaterialRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_record_is_tightly_packed_and_aligned() {
        // two vec4 colors + twelve 4-byte scalars
        assert_eq!(std::mem::size_of::<MaterialData>(), 80);
        assert_eq!(std::mem::size_of::<MaterialData>() % 16, 0);
    }

    #[test]
    fn unknown_material_resolves_to_the_default_slot() {
        let registry = MaterialRegistry::new();
        assert_eq!(registry.get_index(ResourceId::new()), 0);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn registered_materials_get_stable_indices() {
        let mut registry = MaterialRegistry::new();
        let a = MaterialDesc::builder().metallic(1.0).build();
        let a_id = a.id;
        let b = MaterialDesc::builder().roughness(0.1).build();
        let b_id = b.id;

        assert_eq!(registry.add(a), 1);
        assert_eq!(registry.add(b), 2);
        assert_eq!(registry.get_index(a_id), 1);
        assert_eq!(registry.get_index(b_id), 2);
    }
}
