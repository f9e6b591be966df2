use anyhow::Result;
use glam::{Mat4, Vec4};
use vulkan::ash::vk;
use vulkan::gpu_allocator::MemoryLocation;
use vulkan::{
    AccelerationStructure, Buffer, Context, DescriptorAllocatorGrowable, DescriptorSet,
    DescriptorSetLayout, WriteDescriptorSet, WriteDescriptorSetKind, MAX_FRAMES_IN_FLIGHT,
};

use scene::Scene;

use crate::{
    BlasRegistry, MaterialRegistry, MeshRegistry, TextureRegistry, UNBOUND_TEXTURE_INDEX,
};

/// Per-instance companion record the hit shaders index with
/// `gl_InstanceCustomIndexEXT`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MeshInstanceRecord {
    pub vertex_buffer_addr: u64,
    pub index_buffer_addr: u64,
    pub material_idx: u32,
    pub volume_idx: u32,
    pub tiling_factor: f32,
    _pad: f32,
    pub tint: Vec4,
    pub object_to_world: Mat4,
    pub world_to_object: Mat4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitterRecord {
    pub instance_idx: u32,
    pub face_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VolumeRecord {
    pub absorption: Vec4,
    pub scattering: Vec4,
    pub phase_function_g: f32,
    pub density_tex_idx: u32,
    pub detail_tex_idx: u32,
    pub instance_idx: u32,
}

/// Converts a column-major world matrix into the row-major 3x4 layout
/// `VkAccelerationStructureInstanceKHR` expects; the (0,0,0,1) row is
/// dropped.
pub fn transform_to_khr(matrix: Mat4) -> vk::TransformMatrixKHR {
    let mut out = [0.0f32; 12];
    for row in 0..3 {
        for col in 0..4 {
            out[row * 4 + col] = matrix.col(col)[row];
        }
    }
    vk::TransformMatrixKHR { matrix: out }
}

/// Emitter SSBO image: a `u32` element count followed by the records.
pub fn pack_emitters(emitters: &[EmitterRecord]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + emitters.len() * 8);
    bytes.extend_from_slice(&(emitters.len() as u32).to_le_bytes());
    for emitter in emitters {
        bytes.extend_from_slice(&emitter.instance_idx.to_le_bytes());
        bytes.extend_from_slice(&emitter.face_count.to_le_bytes());
    }
    bytes
}

// holds the slot's GPU resources until the slot is reused; dropping a field
// frees the resource the previous frame in this slot consumed
struct FrameResources {
    tlas: Option<AccelerationStructure>,
    _as_instance_buffer: Option<Buffer>,
    _record_buffer: Option<Buffer>,
    _emitter_buffer: Option<Buffer>,
    _volume_buffer: Option<Buffer>,
}

/// Rebuilds the top-level acceleration structure and its companion SSBOs
/// every frame. All outputs are held in `MAX_FRAMES_IN_FLIGHT` slots so the
/// GPU can read frame N-1 while frame N is being assembled; a slot is only
/// overwritten after its fence was waited on.
pub struct RtSceneManager {
    frames: Vec<FrameResources>,

    tlas_layout: DescriptorSetLayout,
    tlas_sets: Vec<DescriptorSet>,
    instance_layout: DescriptorSetLayout,
    instance_sets: Vec<DescriptorSet>,
    emitter_layout: DescriptorSetLayout,
    emitter_sets: Vec<DescriptorSet>,
    volume_layout: DescriptorSetLayout,
    volume_sets: Vec<DescriptorSet>,

    instance_count: u32,
    emitter_count: u32,
    volume_count: u32,
}

impl RtSceneManager {
    pub fn new(context: &Context, allocator: &mut DescriptorAllocatorGrowable) -> Result<Self> {
        let rt_stages = vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR;

        let tlas_layout = context
            .descriptor_set_layout_builder()
            .add_binding(
                0,
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                rt_stages,
            )
            .build()?;
        let instance_layout = context
            .descriptor_set_layout_builder()
            .add_binding(
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::FRAGMENT | vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            )
            .build()?;
        let emitter_layout = context
            .descriptor_set_layout_builder()
            .add_binding(
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            )
            .build()?;
        let volume_layout = context
            .descriptor_set_layout_builder()
            .add_binding(0, vk::DescriptorType::STORAGE_BUFFER, rt_stages)
            .build()?;

        let mut tlas_sets = vec![];
        let mut instance_sets = vec![];
        let mut emitter_sets = vec![];
        let mut volume_sets = vec![];
        let mut frames = vec![];
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            tlas_sets.push(allocator.allocate(&tlas_layout)?);
            instance_sets.push(allocator.allocate(&instance_layout)?);
            emitter_sets.push(allocator.allocate(&emitter_layout)?);
            volume_sets.push(allocator.allocate(&volume_layout)?);
            frames.push(FrameResources {
                tlas: None,
                _as_instance_buffer: None,
                _record_buffer: None,
                _emitter_buffer: None,
                _volume_buffer: None,
            });
        }

        Ok(Self {
            frames,
            tlas_layout,
            tlas_sets,
            instance_layout,
            instance_sets,
            emitter_layout,
            emitter_sets,
            volume_layout,
            volume_sets,
            instance_count: 0,
            emitter_count: 0,
            volume_count: 0,
        })
    }

    pub fn tlas_layout(&self) -> &DescriptorSetLayout {
        &self.tlas_layout
    }

    pub fn instance_layout(&self) -> &DescriptorSetLayout {
        &self.instance_layout
    }

    pub fn emitter_layout(&self) -> &DescriptorSetLayout {
        &self.emitter_layout
    }

    pub fn volume_layout(&self) -> &DescriptorSetLayout {
        &self.volume_layout
    }

    pub fn tlas_set(&self, frame_index: usize) -> &DescriptorSet {
        &self.tlas_sets[frame_index]
    }

    pub fn instance_set(&self, frame_index: usize) -> &DescriptorSet {
        &self.instance_sets[frame_index]
    }

    pub fn emitter_set(&self, frame_index: usize) -> &DescriptorSet {
        &self.emitter_sets[frame_index]
    }

    pub fn volume_set(&self, frame_index: usize) -> &DescriptorSet {
        &self.volume_sets[frame_index]
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn emitter_count(&self) -> u32 {
        self.emitter_count
    }

    pub fn volume_count(&self) -> u32 {
        self.volume_count
    }

    /// Walks the renderable entities, ensures their BLASes exist, uploads the
    /// instance/emitter/volume SSBOs for this frame slot and rebuilds the
    /// TLAS. The previous TLAS of the slot is destroyed only after the new
    /// descriptor write.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &mut self,
        context: &Context,
        frame_index: usize,
        scene: &Scene,
        meshes: &MeshRegistry,
        materials: &MaterialRegistry,
        textures: &TextureRegistry,
        blases: &mut BlasRegistry,
    ) -> Result<()> {
        let mut instances: Vec<vk::AccelerationStructureInstanceKHR> = vec![];
        let mut records: Vec<MeshInstanceRecord> = vec![];
        let mut emitters: Vec<EmitterRecord> = vec![];
        let mut volumes: Vec<VolumeRecord> = vec![];

        let default_density_idx = textures.get_index_by_alias(crate::GREY_TEXTURE_ALIAS);

        for entity in scene.renderables() {
            let transform = entity.transform.as_ref().unwrap();
            let mesh_component = entity.mesh.as_ref().unwrap();

            let Some(mesh) = meshes.get(mesh_component.mesh) else {
                log::warn!("Entity {:?} references an unloaded mesh, skipping", entity.name);
                continue;
            };

            let blas = blases.get_or_create(context, mesh_component.mesh, mesh)?;
            let instance_idx = instances.len() as u32;
            let world = transform.mat4();

            let mut record = MeshInstanceRecord {
                vertex_buffer_addr: mesh.vertex_address,
                index_buffer_addr: mesh.index_address,
                material_idx: UNBOUND_TEXTURE_INDEX,
                volume_idx: UNBOUND_TEXTURE_INDEX,
                tiling_factor: 1.0,
                _pad: 0.0,
                tint: Vec4::ONE,
                object_to_world: world,
                world_to_object: world.inverse(),
            };

            if let Some(binding) = &entity.material {
                record.material_idx = materials.get_index(binding.material);
                record.tiling_factor = binding.tiling_factor;
                record.tint = binding.tint.extend(1.0);

                if materials.get(binding.material).is_emissive() {
                    emitters.push(EmitterRecord {
                        instance_idx,
                        face_count: mesh.triangle_count(),
                    });
                }
            } else if let Some(volume) = &entity.volume {
                record.volume_idx = volumes.len() as u32;
                volumes.push(VolumeRecord {
                    absorption: volume.absorption,
                    scattering: volume.scattering,
                    phase_function_g: volume.phase_function_g,
                    density_tex_idx: volume
                        .density_texture
                        .map(|id| textures.get_index(id))
                        .unwrap_or(default_density_idx),
                    detail_tex_idx: volume
                        .detail_texture
                        .map(|id| textures.get_index(id))
                        .unwrap_or(default_density_idx),
                    instance_idx,
                });
            }

            instances.push(vk::AccelerationStructureInstanceKHR {
                transform: transform_to_khr(world),
                instance_custom_index_and_mask: vk::Packed24_8::new(instance_idx, 0xFF),
                instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                    0,
                    vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE
                        .as_raw() as u8,
                ),
                acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                    device_handle: blas.address,
                },
            });
            records.push(record);
        }

        self.instance_count = instances.len() as u32;
        self.emitter_count = emitters.len() as u32;
        self.volume_count = volumes.len() as u32;

        self.upload_companion_buffers(context, frame_index, &records, &emitters, &volumes)?;

        let instance_buffer = self.upload_instances(context, &instances)?;
        let tlas = build_tlas(context, &instance_buffer, instances.len() as u32)?;

        // write the new TLAS into this slot's descriptor first; dropping the
        // slot afterwards destroys the structure the descriptor last pointed
        // at, which is safe because this frame slot's fence has been waited
        self.tlas_sets[frame_index].update(&[WriteDescriptorSet {
            binding: 0,
            kind: WriteDescriptorSetKind::AccelerationStructure {
                acceleration_structure: &tlas,
            },
        }]);

        let frame = &mut self.frames[frame_index];
        frame.tlas = Some(tlas);
        frame._as_instance_buffer = Some(instance_buffer);

        Ok(())
    }

    /// Whether this frame slot has ever been built.
    pub fn has_tlas(&self, frame_index: usize) -> bool {
        self.frames[frame_index].tlas.is_some()
    }

    fn upload_instances(
        &self,
        context: &Context,
        instances: &[vk::AccelerationStructureInstanceKHR],
    ) -> Result<Buffer> {
        let usage = vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;

        if instances.is_empty() {
            // a zero-instance scene still builds an (empty) TLAS; keep a
            // minimally sized buffer so the geometry address stays valid
            return context.create_buffer(
                usage,
                MemoryLocation::GpuOnly,
                std::mem::size_of::<vk::AccelerationStructureInstanceKHR>() as _,
            );
        }

        vulkan::utils::create_gpu_only_buffer_from_data(context, usage, instances)
    }

    fn upload_companion_buffers(
        &mut self,
        context: &Context,
        frame_index: usize,
        records: &[MeshInstanceRecord],
        emitters: &[EmitterRecord],
        volumes: &[VolumeRecord],
    ) -> Result<()> {
        let storage = vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::STORAGE_BUFFER;

        let instance_buffer = if records.is_empty() {
            context.create_buffer(
                storage,
                MemoryLocation::GpuOnly,
                std::mem::size_of::<MeshInstanceRecord>() as _,
            )?
        } else {
            vulkan::utils::create_gpu_only_buffer_from_data(context, storage, records)?
        };

        let emitter_bytes = pack_emitters(emitters);
        let emitter_buffer =
            vulkan::utils::create_gpu_only_buffer_from_data(context, storage, &emitter_bytes)?;

        let volume_buffer = if volumes.is_empty() {
            context.create_buffer(
                storage,
                MemoryLocation::GpuOnly,
                std::mem::size_of::<VolumeRecord>() as _,
            )?
        } else {
            vulkan::utils::create_gpu_only_buffer_from_data(context, storage, volumes)?
        };

        self.instance_sets[frame_index].update(&[WriteDescriptorSet {
            binding: 0,
            kind: WriteDescriptorSetKind::StorageBuffer {
                buffer: &instance_buffer,
            },
        }]);
        self.emitter_sets[frame_index].update(&[WriteDescriptorSet {
            binding: 0,
            kind: WriteDescriptorSetKind::StorageBuffer {
                buffer: &emitter_buffer,
            },
        }]);
        self.volume_sets[frame_index].update(&[WriteDescriptorSet {
            binding: 0,
            kind: WriteDescriptorSetKind::StorageBuffer {
                buffer: &volume_buffer,
            },
        }]);

        let frame = &mut self.frames[frame_index];
        frame._record_buffer = Some(instance_buffer);
        frame._emitter_buffer = Some(emitter_buffer);
        frame._volume_buffer = Some(volume_buffer);

        Ok(())
    }
}

fn build_tlas(
    context: &Context,
    instance_buffer: &Buffer,
    instance_count: u32,
) -> Result<AccelerationStructure> {
    let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
        .array_of_pointers(false)
        .data(vk::DeviceOrHostAddressConstKHR {
            device_address: instance_buffer.get_device_address(),
        })
        .build();

    let geometry = vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            instances: instances_data,
        })
        .build();

    let range = vk::AccelerationStructureBuildRangeInfoKHR::builder()
        .primitive_count(instance_count)
        .build();

    context.create_top_level_acceleration_structure(&[geometry], &[range], &[instance_count])
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn khr_transform_is_the_transposed_top_three_rows() {
        let matrix = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0))
            * Mat4::from_scale(Vec3::new(2.0, 2.0, 2.0));
        let khr = transform_to_khr(matrix);

        // rows: [2 0 0 1], [0 2 0 2], [0 0 2 3]
        assert_eq!(khr.matrix[0], 2.0);
        assert_eq!(khr.matrix[3], 1.0);
        assert_eq!(khr.matrix[5], 2.0);
        assert_eq!(khr.matrix[7], 2.0);
        assert_eq!(khr.matrix[10], 2.0);
        assert_eq!(khr.matrix[11], 3.0);
    }

    #[test]
    fn emitter_pack_is_count_prefixed() {
        let emitters = [EmitterRecord {
            instance_idx: 1,
            face_count: 2,
        }];
        let bytes = pack_emitters(&emitters);

        assert_eq!(bytes.len(), 12);
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 2);
    }

    #[test]
    fn zero_emitters_still_have_a_count_word() {
        assert_eq!(pack_emitters(&[]), vec![0, 0, 0, 0]);
    }

    #[test]
    fn records_are_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<MeshInstanceRecord>(), 176);
        assert_eq!(std::mem::size_of::<MeshInstanceRecord>() % 16, 0);
        assert_eq!(std::mem::size_of::<EmitterRecord>(), 8);
        assert_eq!(std::mem::size_of::<VolumeRecord>(), 48);
    }
}
