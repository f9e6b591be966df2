use anyhow::Result;
use glam::Vec4;
use scene::Scene;
use vulkan::ash::vk;
use vulkan::{
    alpha_blend_attachment, Context, DescriptorSetLayout, GraphicsPipeline,
    GraphicsPipelineCreateInfo, GraphicsShaderCreateInfo, NoVertex, PipelineLayout, RenderPass,
};

use crate::{FrameInfo, GlobalUbo, PointLightData, ShaderLoader, MAX_LIGHTS};

const VERT_SHADER: &str = "point_light.vert";
const FRAG_SHADER: &str = "point_light.frag";

#[repr(C)]
#[derive(Clone, Copy)]
struct PointLightPushConstants {
    position: Vec4,
    color: Vec4,
    radius: f32,
}

/// Alpha-blended camera-facing billboards for the point lights, six vertices
/// per light generated in the vertex shader.
pub struct PointLightPass {
    pipeline_layout: PipelineLayout,
    pipeline: GraphicsPipeline,
}

impl PointLightPass {
    pub fn new(
        context: &Context,
        loader: &ShaderLoader,
        global_set_layout: &DescriptorSetLayout,
        render_pass: &RenderPass,
    ) -> Result<Self> {
        let push_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .size(std::mem::size_of::<PointLightPushConstants>() as u32)
            .build();

        let pipeline_layout =
            context.create_pipeline_layout(&[global_set_layout], &[push_range])?;
        let pipeline = create_pipeline(context, loader, &pipeline_layout, render_pass)?;

        Ok(Self {
            pipeline_layout,
            pipeline,
        })
    }

    /// Indexed assignment of the scene's lights into the UBO array, capped at
    /// `MAX_LIGHTS`.
    pub fn update(&self, scene: &Scene, ubo: &mut GlobalUbo) {
        let mut light_index = 0usize;

        for entity in scene.point_lights() {
            if light_index >= MAX_LIGHTS {
                log::warn!("More than {MAX_LIGHTS} point lights in scene, ignoring the rest");
                break;
            }

            let transform = entity.transform.as_ref().unwrap();
            let light = entity.point_light.as_ref().unwrap();
            let color = entity.color.as_ref().unwrap();

            ubo.point_lights[light_index] = PointLightData {
                position: transform.translation.extend(1.0),
                color: color.color.extend(light.intensity),
            };
            light_index += 1;
        }

        ubo.num_lights = light_index as i32;
    }

    pub fn render(&self, frame_info: &FrameInfo, ubo: &GlobalUbo) {
        let cmd = frame_info.cmd;
        let camera_position = ubo.inverse_view.col(3).truncate();

        // back-to-front for correct alpha blending
        let mut sorted: Vec<_> = frame_info
            .scene
            .point_lights()
            .map(|entity| {
                let transform = entity.transform.as_ref().unwrap();
                let to_camera = camera_position - transform.translation;
                (to_camera.length_squared(), entity)
            })
            .collect();
        sorted.sort_by(|a, b| b.0.total_cmp(&a.0));

        cmd.bind_graphics_pipeline(&self.pipeline);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            &self.pipeline_layout,
            0,
            &[frame_info.global_set],
        );

        for (_, entity) in sorted {
            let transform = entity.transform.as_ref().unwrap();
            let light = entity.point_light.as_ref().unwrap();
            let color = entity.color.as_ref().unwrap();

            let push = PointLightPushConstants {
                position: transform.translation.extend(1.0),
                color: color.color.extend(light.intensity),
                radius: transform.scale.x,
            };
            cmd.push_constants(
                &self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                &push,
            );

            cmd.draw(6);
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
            Err(err) => {
                log::error!("Point light pipeline reload failed, keeping previous: {err:#}")
            }
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
        color_attachment_blend: Some(alpha_blend_attachment()),
        ..GraphicsPipelineCreateInfo::opaque(&shaders, render_pass)
    };

    context.create_graphics_pipeline::<NoVertex>(pipeline_layout, create_info)
}
