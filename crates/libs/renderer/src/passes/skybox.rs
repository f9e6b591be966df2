use anyhow::Result;
use vulkan::ash::vk;
use vulkan::{
    Context, DescriptorSetLayout, GraphicsPipeline, GraphicsPipelineCreateInfo,
    GraphicsShaderCreateInfo, NoVertex, PipelineLayout, RenderPass,
};

use crate::{FrameInfo, ShaderLoader, Skybox};

const VERT_SHADER: &str = "skybox.vert";
const FRAG_SHADER: &str = "skybox.frag";

/// Draws the environment cube behind everything already rendered: depth test
/// LESS_OR_EQUAL with depth writes off. The cube's 36 vertices are generated
/// in the vertex shader, no vertex buffer is bound.
pub struct SkyboxPass {
    pipeline_layout: PipelineLayout,
    pipeline: GraphicsPipeline,
}

impl SkyboxPass {
    pub fn new(
        context: &Context,
        loader: &ShaderLoader,
        global_set_layout: &DescriptorSetLayout,
        skybox: &Skybox,
        render_pass: &RenderPass,
    ) -> Result<Self> {
        let pipeline_layout = context.create_pipeline_layout(
            &[global_set_layout, skybox.descriptor_set_layout()],
            &[],
        )?;

        let pipeline = create_pipeline(context, loader, &pipeline_layout, render_pass)?;

        Ok(Self {
            pipeline_layout,
            pipeline,
        })
    }

    pub fn render(&self, frame_info: &FrameInfo, skybox: &Skybox) {
        let cmd = frame_info.cmd;

        cmd.bind_graphics_pipeline(&self.pipeline);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            &self.pipeline_layout,
            0,
            &[frame_info.global_set, skybox.descriptor_set()],
        );

        cmd.draw(36);
    }

    pub fn reload_shaders(
        &mut self,
        context: &Context,
        loader: &ShaderLoader,
        render_pass: &RenderPass,
    ) {
        match create_pipeline(context, loader, &self.pipeline_layout, render_pass) {
            Ok(pipeline) => self.pipeline = pipeline,
            Err(err) => log::error!("Skybox pipeline reload failed, keeping previous: {err:#}"),
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

    let create_info = GraphicsPipelineCreateInfo {
        cull_mode: vk::CullModeFlags::BACK,
        depth_write_enable: false,
        depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
        ..GraphicsPipelineCreateInfo::opaque(&shaders, render_pass)
    };

    context.create_graphics_pipeline::<NoVertex>(pipeline_layout, create_info)
}
