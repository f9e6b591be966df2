use std::collections::HashMap;

use anyhow::Result;
use scene::{MeshVertex, ResourceId};
use vulkan::ash::vk;
use vulkan::{AccelerationStructure, Context};

use crate::VulkanMesh;

/// Memoizes one bottom-level acceleration structure per mesh. BLASes are
/// immutable after the build; instances reference them by device address.
#[derive(Default)]
pub struct BlasRegistry {
    blases: HashMap<ResourceId, AccelerationStructure>,
}

impl BlasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &mut self,
        context: &Context,
        mesh_id: ResourceId,
        mesh: &VulkanMesh,
    ) -> Result<&AccelerationStructure> {
        if !self.blases.contains_key(&mesh_id) {
            log::debug!(
                "Building BLAS for mesh {mesh_id} ({} triangles)",
                mesh.triangle_count()
            );
            let blas = build_blas(context, mesh)?;
            self.blases.insert(mesh_id, blas);
        }

        Ok(&self.blases[&mesh_id])
    }

    pub fn len(&self) -> usize {
        self.blases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blases.is_empty()
    }
}

fn build_blas(context: &Context, mesh: &VulkanMesh) -> Result<AccelerationStructure> {
    let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
        .vertex_format(vk::Format::R32G32B32_SFLOAT)
        .vertex_data(vk::DeviceOrHostAddressConstKHR {
            device_address: mesh.vertex_address,
        })
        .vertex_stride(std::mem::size_of::<MeshVertex>() as _)
        .max_vertex(mesh.vertex_count - 1)
        .index_type(vk::IndexType::UINT32)
        .index_data(vk::DeviceOrHostAddressConstKHR {
            device_address: mesh.index_address,
        })
        .build();

    let geometry = vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
        .flags(vk::GeometryFlagsKHR::OPAQUE)
        .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
        .build();

    let range = vk::AccelerationStructureBuildRangeInfoKHR::builder()
        .primitive_count(mesh.triangle_count())
        .build();

    context.create_bottom_level_acceleration_structure(
        &[geometry],
        &[range],
        &[mesh.triangle_count()],
    )
}
