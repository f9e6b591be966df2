use anyhow::Result;
use vulkan::ash::vk;
use vulkan::{
    Context, DescriptorAllocatorGrowable, DescriptorSet, DescriptorSetLayout, Image, ImageView,
    PipelineLayout, RayTracingPipeline, RayTracingPipelineCreateInfo, RayTracingShaderCreateInfo,
    RayTracingShaderGroup, ShaderBindingTable, WriteDescriptorSet, WriteDescriptorSetKind,
};

use crate::{BlueNoise, FrameInfo, RtSceneManager, ShaderLoader, Skybox, TextureRegistry};

const RAYGEN_SHADER: &str = "raytracing/vol_pathtracing.rgen";
const MISS_SHADERS: [&str; 3] = [
    "raytracing/vol_pathtracing.rmiss",
    "raytracing/visibility.rmiss",
    "raytracing/distance.rmiss",
];
const CLOSEST_HIT_SHADERS: [&str; 3] = [
    "raytracing/vol_pathtracing.rchit",
    "raytracing/visibility.rchit",
    "raytracing/distance.rchit",
];

/// Sample-sequence selector for the raygen shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NoiseMode {
    White = 0,
    Blue = 1,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct PathTracerPushConstants {
    pub noise_mode: u32,
    pub blue_noise_debug_index: i32,
    /// Bitfield: 1 roughness, 2 metallic, 4 transmission.
    pub override_flags: u32,
    pub roughness_override: f32,
    pub metallic_override: f32,
    pub transmission_override: f32,
}

impl Default for PathTracerPushConstants {
    fn default() -> Self {
        Self {
            noise_mode: NoiseMode::Blue as u32,
            blue_noise_debug_index: -1,
            override_flags: 0,
            roughness_override: 0.5,
            metallic_override: 0.0,
            transmission_override: 0.0,
        }
    }
}

/// Volumetric path tracer writing into the offscreen scene image at
/// swap-chain resolution.
pub struct PathTracerPass {
    _storage_image_layout: DescriptorSetLayout,
    storage_image_set: DescriptorSet,
    pipeline_layout: PipelineLayout,
    pipeline: RayTracingPipeline,
    sbt: ShaderBindingTable,
    pub push_constants: PathTracerPushConstants,
}

pub struct PathTracerLayouts<'a> {
    pub global: &'a DescriptorSetLayout,
    pub textures: &'a TextureRegistry,
    pub materials: &'a DescriptorSetLayout,
    pub skybox: &'a Skybox,
    pub rt_scene: &'a RtSceneManager,
    pub blue_noise: &'a BlueNoise,
}

impl PathTracerPass {
    pub fn new(
        context: &Context,
        loader: &ShaderLoader,
        allocator: &mut DescriptorAllocatorGrowable,
        layouts: &PathTracerLayouts,
        scene_image_view: &ImageView,
    ) -> Result<Self> {
        let storage_image_layout = context
            .descriptor_set_layout_builder()
            .add_binding(
                0,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::ShaderStageFlags::RAYGEN_KHR,
            )
            .build()?;

        let storage_image_set = allocator.allocate(&storage_image_layout)?;
        storage_image_set.update(&[WriteDescriptorSet {
            binding: 0,
            kind: WriteDescriptorSetKind::StorageImage {
                view: scene_image_view,
                layout: vk::ImageLayout::GENERAL,
            },
        }]);

        let push_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR)
            .size(std::mem::size_of::<PathTracerPushConstants>() as u32)
            .build();

        // set order is fixed: ubo, tlas, textures, output image, materials,
        // skybox, mesh instances, emitters, volumes, blue noise
        let pipeline_layout = context.create_pipeline_layout(
            &[
                layouts.global,
                layouts.rt_scene.tlas_layout(),
                layouts.textures.descriptor_set_layout(),
                &storage_image_layout,
                layouts.materials,
                layouts.skybox.descriptor_set_layout(),
                layouts.rt_scene.instance_layout(),
                layouts.rt_scene.emitter_layout(),
                layouts.rt_scene.volume_layout(),
                layouts.blue_noise.layout(),
            ],
            &[push_range],
        )?;

        let pipeline = create_pipeline(context, loader, &pipeline_layout)?;
        let sbt = context.create_shader_binding_table(&pipeline)?;

        Ok(Self {
            _storage_image_layout: storage_image_layout,
            storage_image_set,
            pipeline_layout,
            pipeline,
            sbt,
            push_constants: PathTracerPushConstants::default(),
        })
    }

    /// Re-points the output binding after the offscreen target was recreated.
    pub fn update_scene_image(&self, scene_image_view: &ImageView) {
        self.storage_image_set.update(&[WriteDescriptorSet {
            binding: 0,
            kind: WriteDescriptorSetKind::StorageImage {
                view: scene_image_view,
                layout: vk::ImageLayout::GENERAL,
            },
        }]);
    }

    /// Moves the scene image into `GENERAL` so the raygen shader can store
    /// into it.
    pub fn prepare(&self, frame_info: &FrameInfo, scene_image: &Image) -> Result<()> {
        scene_image.transition_layout(
            frame_info.cmd,
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        frame_info: &FrameInfo,
        extent: vk::Extent2D,
        textures: &TextureRegistry,
        materials_set: &DescriptorSet,
        skybox: &Skybox,
        rt_scene: &RtSceneManager,
        blue_noise: &BlueNoise,
    ) {
        let cmd = frame_info.cmd;
        let frame_index = frame_info.frame_index;

        cmd.bind_rt_pipeline(&self.pipeline);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::RAY_TRACING_KHR,
            &self.pipeline_layout,
            0,
            &[
                frame_info.global_set,
                rt_scene.tlas_set(frame_index),
                textures.descriptor_set(),
                &self.storage_image_set,
                materials_set,
                skybox.descriptor_set(),
                rt_scene.instance_set(frame_index),
                rt_scene.emitter_set(frame_index),
                rt_scene.volume_set(frame_index),
                blue_noise.descriptor_set(),
            ],
        );

        cmd.push_constants(
            &self.pipeline_layout,
            vk::ShaderStageFlags::RAYGEN_KHR,
            &self.push_constants,
        );

        cmd.trace_rays(&self.sbt, extent.width, extent.height);
    }

    /// Returns the scene image to `SHADER_READ_ONLY` for whoever samples it
    /// next; `src_stage` is the stage that produced the current contents.
    pub fn transition_to_shader_read(
        &self,
        frame_info: &FrameInfo,
        scene_image: &Image,
        src_stage: vk::PipelineStageFlags2,
    ) -> Result<()> {
        scene_image.transition_layout(
            frame_info.cmd,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_stage,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
        )
    }

    pub fn reload_shaders(&mut self, context: &Context, loader: &ShaderLoader) {
        let rebuilt = create_pipeline(context, loader, &self.pipeline_layout)
            .and_then(|pipeline| {
                let sbt = context.create_shader_binding_table(&pipeline)?;
                Ok((pipeline, sbt))
            });

        match rebuilt {
            Ok((pipeline, sbt)) => {
                self.pipeline = pipeline;
                self.sbt = sbt;
            }
            Err(err) => {
                log::error!("Path tracer pipeline reload failed, keeping previous: {err:#}")
            }
        }
    }
}

fn create_pipeline(
    context: &Context,
    loader: &ShaderLoader,
    pipeline_layout: &PipelineLayout,
) -> Result<RayTracingPipeline> {
    let raygen = loader.load(RAYGEN_SHADER)?;
    let miss = MISS_SHADERS
        .iter()
        .map(|name| loader.load(name))
        .collect::<Result<Vec<_>>>()?;
    let hit = CLOSEST_HIT_SHADERS
        .iter()
        .map(|name| loader.load(name))
        .collect::<Result<Vec<_>>>()?;

    let mut shaders = vec![RayTracingShaderCreateInfo {
        source: &raygen,
        stage: vk::ShaderStageFlags::RAYGEN_KHR,
        group: RayTracingShaderGroup::RayGen,
    }];
    for source in &miss {
        shaders.push(RayTracingShaderCreateInfo {
            source,
            stage: vk::ShaderStageFlags::MISS_KHR,
            group: RayTracingShaderGroup::Miss,
        });
    }
    for source in &hit {
        shaders.push(RayTracingShaderCreateInfo {
            source,
            stage: vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            group: RayTracingShaderGroup::ClosestHit,
        });
    }

    let create_info = RayTracingPipelineCreateInfo {
        shaders: &shaders,
        max_ray_recursion_depth: 2,
    };

    context.create_ray_tracing_pipeline(pipeline_layout, create_info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_sbt_sees_one_raygen_three_miss_three_hit_groups() {
        assert_eq!(MISS_SHADERS.len(), 3);
        assert_eq!(CLOSEST_HIT_SHADERS.len(), 3);
    }

    #[test]
    fn default_push_constants_select_blue_noise() {
        let push = PathTracerPushConstants::default();
        assert_eq!(push.noise_mode, NoiseMode::Blue as u32);
        assert_eq!(push.blue_noise_debug_index, -1);
        assert_eq!(push.override_flags, 0);
    }
}
