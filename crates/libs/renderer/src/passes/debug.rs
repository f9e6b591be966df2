use anyhow::Result;
use glam::Mat4;
use vulkan::ash::vk;
use vulkan::{
    Context, DescriptorSetLayout, GraphicsPipeline, GraphicsPipelineCreateInfo,
    GraphicsShaderCreateInfo, PipelineLayout, RenderPass,
};

use crate::{FrameInfo, MeshRegistry, MeshVertexLayout, ShaderLoader, TextureRegistry};

const VERT_SHADER: &str = "debug.vert";
const FRAG_SHADER: &str = "debug.frag";

#[repr(C)]
#[derive(Clone, Copy)]
struct DebugPushConstants {
    model: Mat4,
    normal: Mat4,
    /// Which channel the fragment shader visualizes (normals, UVs, depth).
    debug_view: u32,
    albedo_idx: u32,
    tiling_factor: f32,
}

/// Visualization pass that replaces the material pass when debugging is
/// toggled; draws the same geometry with an inspection shader.
pub struct DebugPass {
    pipeline_layout: PipelineLayout,
    pipeline: GraphicsPipeline,
    pub debug_view: u32,
}

impl DebugPass {
    pub fn new(
        context: &Context,
        loader: &ShaderLoader,
        global_set_layout: &DescriptorSetLayout,
        textures: &TextureRegistry,
        render_pass: &RenderPass,
    ) -> Result<Self> {
        let push_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .size(std::mem::size_of::<DebugPushConstants>() as u32)
            .build();

        let pipeline_layout = context.create_pipeline_layout(
            &[global_set_layout, textures.descriptor_set_layout()],
            &[push_range],
        )?;
        let pipeline = create_pipeline(context, loader, &pipeline_layout, render_pass)?;

        Ok(Self {
            pipeline_layout,
            pipeline,
            debug_view: 0,
        })
    }

    pub fn render(
        &self,
        frame_info: &FrameInfo,
        meshes: &MeshRegistry,
        textures: &TextureRegistry,
    ) {
        let cmd = frame_info.cmd;

        cmd.bind_graphics_pipeline(&self.pipeline);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            &self.pipeline_layout,
            0,
            &[frame_info.global_set, textures.descriptor_set()],
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

            let push = DebugPushConstants {
                model: transform.mat4(),
                normal: Mat4::from_mat3(transform.normal_matrix()),
                debug_view: self.debug_view,
                albedo_idx: 0,
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
            Err(err) => log::error!("Debug pipeline reload failed, keeping previous: {err:#}"),
        }
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
