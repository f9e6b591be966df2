use std::collections::HashMap;

use anyhow::Result;
use scene::{MeshData, MeshVertex, ResourceId};
use vulkan::ash::vk;
use vulkan::{utils::create_gpu_only_buffer_from_data, Buffer, CommandBuffer, Context, Vertex};

/// GPU residency for one mesh: vertex/index buffers plus their device
/// addresses for the ray-tracing path.
pub struct VulkanMesh {
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub vertex_count: u32,
    pub index_count: u32,
    pub vertex_address: u64,
    pub index_address: u64,
}

impl VulkanMesh {
    pub fn new(context: &Context, data: &MeshData) -> Result<Self> {
        let buffer_usage = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;

        let vertex_buffer = create_gpu_only_buffer_from_data(
            context,
            buffer_usage | vk::BufferUsageFlags::VERTEX_BUFFER,
            &data.vertices,
        )?;
        let index_buffer = create_gpu_only_buffer_from_data(
            context,
            buffer_usage | vk::BufferUsageFlags::INDEX_BUFFER,
            &data.indices,
        )?;

        let vertex_address = vertex_buffer.get_device_address();
        let index_address = index_buffer.get_device_address();

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: data.vertices.len() as u32,
            index_count: data.indices.len() as u32,
            vertex_address,
            index_address,
        })
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }

    pub fn bind(&self, cmd: &CommandBuffer) {
        cmd.bind_vertex_buffer(&self.vertex_buffer);
        cmd.bind_index_buffer(&self.index_buffer);
    }

    pub fn draw(&self, cmd: &CommandBuffer) {
        cmd.draw_indexed(self.index_count);
    }
}

/// Vertex layout the raster pipelines consume; must match
/// `scene::MeshVertex` field offsets.
pub struct MeshVertexLayout;

impl Vertex for MeshVertexLayout {
    fn bindings() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<MeshVertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    fn attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 16,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 3,
                format: vk::Format::R32G32_SFLOAT,
                offset: 48,
            },
        ]
    }
}

/// Position-only layout for the shadow pass.
pub struct MeshVertexPositionOnly;

impl Vertex for MeshVertexPositionOnly {
    fn bindings() -> Vec<vk::VertexInputBindingDescription> {
        MeshVertexLayout::bindings()
    }

    fn attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![vk::VertexInputAttributeDescription {
            binding: 0,
            location: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        }]
    }
}

/// Uploaded meshes keyed by resource id.
#[derive(Default)]
pub struct MeshRegistry {
    meshes: HashMap<ResourceId, VulkanMesh>,
}

impl MeshRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload(&mut self, context: &Context, data: &MeshData) -> Result<ResourceId> {
        let mesh = VulkanMesh::new(context, data)?;
        self.meshes.insert(data.id, mesh);
        Ok(data.id)
    }

    pub fn get(&self, id: ResourceId) -> Option<&VulkanMesh> {
        self.meshes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_attributes_match_mesh_vertex_offsets() {
        let attributes = MeshVertexLayout::attributes();
        assert_eq!(attributes.len(), 4);
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 16);
        assert_eq!(attributes[2].offset, 32);
        assert_eq!(attributes[3].offset, 48);

        let stride = MeshVertexLayout::bindings()[0].stride;
        assert_eq!(stride as usize, std::mem::size_of::<MeshVertex>());
    }

    #[test]
    fn shadow_layout_only_reads_positions() {
        assert_eq!(MeshVertexPositionOnly::attributes().len(), 1);
        assert_eq!(
            MeshVertexPositionOnly::bindings()[0].stride,
            MeshVertexLayout::bindings()[0].stride
        );
    }
}
