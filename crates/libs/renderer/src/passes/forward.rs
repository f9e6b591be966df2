use anyhow::Result;
use glam::{Mat4, Vec4};
use vulkan::ash::vk;
use vulkan::{
    Context, DescriptorAllocatorGrowable, DescriptorSet, DescriptorSetLayout, GraphicsPipeline,
    GraphicsPipelineCreateInfo, GraphicsShaderCreateInfo, ImageView, PipelineLayout, RenderPass,
    Sampler, WriteDescriptorSet, WriteDescriptorSetKind,
};

use crate::{
    FrameInfo, MaterialRegistry, MeshRegistry, MeshVertexLayout, ShaderLoader, TextureRegistry,
};

const VERT_SHADER: &str = "material.vert";
const FRAG_SHADER: &str = "material.frag";

/// Per-draw data for the forward pass; the normal matrix rides in a full
/// mat4 to keep std430 alignment simple.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MaterialPushConstants {
    pub model: Mat4,
    pub normal: Mat4,
    pub color: Vec4,
    pub specular_intensity: f32,
    pub shininess: f32,
    pub albedo_idx: u32,
    pub normal_idx: u32,
    pub ao_idx: u32,
    pub tiling_factor: f32,
}

/// Forward Blinn-Phong pass over every `Transform + Mesh + Material` entity,
/// sampling the bindless texture array and the shadow cube. Draw order is
/// scene order, no sort.
pub struct ForwardMaterialPass {
    shadow_map_layout: DescriptorSetLayout,
    shadow_map_set: DescriptorSet,
    pipeline_layout: PipelineLayout,
    pipeline: GraphicsPipeline,
}

impl ForwardMaterialPass {
    pub fn new(
        context: &Context,
        loader: &ShaderLoader,
        allocator: &mut DescriptorAllocatorGrowable,
        global_set_layout: &DescriptorSetLayout,
        textures: &TextureRegistry,
        shadow_map: (&ImageView, &Sampler),
        render_pass: &RenderPass,
    ) -> Result<Self> {
        let shadow_map_layout = context
            .descriptor_set_layout_builder()
            .add_binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build()?;

        let shadow_map_set = allocator.allocate(&shadow_map_layout)?;
        shadow_map_set.update(&[WriteDescriptorSet {
            binding: 0,
            kind: WriteDescriptorSetKind::CombinedImageSampler {
                view: shadow_map.0,
                sampler: shadow_map.1,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        }]);

        let push_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .size(std::mem::size_of::<MaterialPushConstants>() as u32)
            .build();

        let pipeline_layout = context.create_pipeline_layout(
            &[
                global_set_layout,
                textures.descriptor_set_layout(),
                &shadow_map_layout,
            ],
            &[push_range],
        )?;
        let pipeline = create_pipeline(context, loader, &pipeline_layout, render_pass)?;

        Ok(Self {
            shadow_map_layout,
            shadow_map_set,
            pipeline_layout,
            pipeline,
        })
    }

    pub fn render(
        &self,
        frame_info: &FrameInfo,
        meshes: &MeshRegistry,
        materials: &MaterialRegistry,
        textures: &TextureRegistry,
    ) {
        let cmd = frame_info.cmd;

        cmd.bind_graphics_pipeline(&self.pipeline);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            &self.pipeline_layout,
            0,
            &[
                frame_info.global_set,
                textures.descriptor_set(),
                &self.shadow_map_set,
            ],
        );

        for entity in frame_info.scene.entities() {
            let (Some(transform), Some(mesh_component), Some(binding)) = (
                entity.transform.as_ref(),
                entity.mesh.as_ref(),
                entity.material.as_ref(),
            ) else {
                continue;
            };
            let Some(mesh) = meshes.get(mesh_component.mesh) else {
                continue;
            };

            let material = materials.get(binding.material);

            let texture_index = |map: Option<scene::ResourceId>| {
                map.map(|id| textures.get_index(id)).unwrap_or(0)
            };

            let push = MaterialPushConstants {
                model: transform.mat4(),
                normal: Mat4::from_mat3(transform.normal_matrix()),
                color: material.albedo_color * binding.tint.extend(1.0),
                specular_intensity: material.bp_specular_intensity,
                shininess: material.bp_specular_shininess,
                albedo_idx: texture_index(material.albedo_map),
                normal_idx: texture_index(material.normal_map),
                ao_idx: texture_index(material.ambient_occlusion_map),
                tiling_factor: binding.tiling_factor,
            };
            cmd.push_constants(
                &self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                &push,
            );

            mesh.bind(cmd);
            mesh.draw(cmd);
        }
    }

    pub fn reload_shaders(
        &mut self,
        context: &Context,
        loader: &ShaderLoader,
        render_pass: &RenderPass,
    ) {
        match create_pipeline(context, loader, &self.pipeline_layout, render_pass) {
            Ok(pipeline) => self.pipeline = pipeline,
            Err(err) => log::error!("Material pipeline reload failed, keeping previous: {err:#}"),
        }
    }

    pub fn shadow_map_layout(&self) -> &DescriptorSetLayout {
        &self.shadow_map_layout
    }
}

fn create_pipeline(
    context: &Context,
    loader: &ShaderLoader,
    pipeline_layout: &PipelineLayout,
    render_pass: &RenderPass,
) -> Result<GraphicsPipeline> {
    let vert = loader.load(VERT_SHADER)?;
    let frag = loader.load(FRAG_SHADER)?;

    let shaders = [
        GraphicsShaderCreateInfo {
            source: &vert,
            stage: vk::ShaderStageFlags::VERTEX,
        },
        GraphicsShaderCreateInfo {
            source: &frag,
            stage: vk::ShaderStageFlags::FRAGMENT,
        },
    ];

    let create_info = GraphicsPipelineCreateInfo::opaque(&shaders, render_pass);

    context.create_graphics_pipeline::<MeshVertexLayout>(pipeline_layout, create_info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_fit_common_device_limits() {
        // two mat4s + color + six scalars; desktop parts expose at least 256
        // bytes of push constant space
        let size = std::mem::size_of::<MaterialPushConstants>();
        assert!(size <= 256);
        assert_eq!(size % 4, 0);
    }
}
