use std::sync::Arc;

use anyhow::Result;
use glam::Mat4;
use scene::{Environment, ImageData, MaterialDesc, MeshData, ResourceId, Scene};
use vulkan::ash::vk;
use vulkan::gpu_allocator::MemoryLocation;
use vulkan::{
    Buffer, CommandBuffer, Context, DescriptorAllocatorGrowable, DescriptorSet,
    DescriptorSetLayout, Framebuffer, Image, ImageView, PoolSizeRatio, RenderPass, Sampler,
    WriteDescriptorSet, WriteDescriptorSetKind, MAX_FRAMES_IN_FLIGHT,
};

use crate::{
    BlasRegistry, BlueNoise, DebugPass, DenoiserPass, DensityVolumePass, ForwardMaterialPass,
    FrameInfo, GlobalUbo, MaterialRegistry, MeshRegistry, PathTracerLayouts, PathTracerPass,
    PointLightPass, RenderConfig, Renderer, RtSceneManager, ShaderLoader, ShadowPass, Skybox,
    SkyboxPass, TextureRegistry,
};

/// Startup assets the registries are populated with, after the defaults and
/// before the first frame. Registries are append-only afterwards.
#[derive(Default)]
pub struct RenderAssets {
    pub meshes: Vec<MeshData>,
    pub textures: Vec<TextureAsset>,
    pub materials: Vec<MaterialDesc>,
}

pub struct TextureAsset {
    pub id: ResourceId,
    pub data: ImageData,
    pub alias: Option<String>,
}

const GLOBAL_UBO_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw()
        | vk::ShaderStageFlags::FRAGMENT.as_raw()
        | vk::ShaderStageFlags::RAYGEN_KHR.as_raw()
        | vk::ShaderStageFlags::CLOSEST_HIT_KHR.as_raw()
        | vk::ShaderStageFlags::MISS_KHR.as_raw(),
);

struct OffscreenTarget {
    color_image: Image,
    color_view: ImageView,
    _depth_image: Image,
    _depth_view: ImageView,
    framebuffer: Framebuffer,
}

/// Owns every pass and composes them into a frame: offscreen target, global
/// UBO, branch selection (path traced vs rasterized), the pass-to-pass layout
/// transitions of the scene image, and the UI composite.
pub struct MasterRenderSystem {
    context: Arc<Context>,
    config: RenderConfig,
    loader: ShaderLoader,
    allocator: DescriptorAllocatorGrowable,

    pub meshes: MeshRegistry,
    pub textures: TextureRegistry,
    pub materials: MaterialRegistry,
    blases: BlasRegistry,
    skybox: Skybox,
    blue_noise: BlueNoise,

    offscreen_color_format: vk::Format,
    offscreen_render_pass: RenderPass,
    target: OffscreenTarget,
    scene_sampler: Sampler,

    _global_set_layout: DescriptorSetLayout,
    ubo_buffers: Vec<Buffer>,
    global_sets: Vec<DescriptorSet>,
    pub ubo: GlobalUbo,
    last_view: Mat4,

    shadow: ShadowPass,
    forward: ForwardMaterialPass,
    debug: DebugPass,
    skybox_pass: SkyboxPass,
    point_lights: PointLightPass,
    path_tracer: PathTracerPass,
    denoiser: DenoiserPass,
    pub density: DensityVolumePass,
    rt_scene: RtSceneManager,

    _scene_texture_layout: DescriptorSetLayout,
    scene_texture_set: DescriptorSet,

    last_extent: vk::Extent2D,
    pub raytracing_enabled: bool,
    pub denoising_enabled: bool,
    pub debug_enabled: bool,
    reload_shaders_requested: bool,
}

impl MasterRenderSystem {
    pub fn new(
        context: Arc<Context>,
        renderer: &Renderer,
        config: RenderConfig,
        environment: &Environment,
        assets: RenderAssets,
    ) -> Result<Self> {
        config.validate()?;

        let loader = ShaderLoader::new(config.use_compiled_shaders);

        // pool shares follow the descriptor mix of the passes; the bindless
        // array dominates the sampled-image share
        let texture_estimate =
            (assets.textures.len() as u32 + config.blue_noise_count + 8).max(16);
        let mut allocator = context.create_descriptor_allocator(vec![
            PoolSizeRatio {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                ratio: 1.0,
            },
            PoolSizeRatio {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                ratio: texture_estimate as f32 / 4.0,
            },
            PoolSizeRatio {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                ratio: 1.0,
            },
            PoolSizeRatio {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                ratio: 2.0,
            },
            PoolSizeRatio {
                ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                ratio: 2.0,
            },
        ]);

        // registries: defaults first, then the scene's assets
        let mut textures = TextureRegistry::new(&context)?;
        for asset in &assets.textures {
            textures.add_with_id(&context, asset.id, &asset.data, asset.alias.as_deref())?;
        }

        let mut materials = MaterialRegistry::new();
        for material in assets.materials {
            materials.add(material);
        }

        let mut meshes = MeshRegistry::new();
        for mesh in &assets.meshes {
            meshes.upload(&context, mesh)?;
        }

        let blue_noise = BlueNoise::load(&context, &mut allocator, &mut textures, &config)?;

        textures.build_descriptor_set(&context, &mut allocator)?;
        materials.build_descriptor_sets(&context, &mut allocator)?;

        let mut skybox = Skybox::from_environment(&context, environment)?;
        skybox.build_descriptor_set(&context, &mut allocator)?;

        // offscreen target
        let offscreen_color_format = context.find_supported_format(
            &[
                vk::Format::R16G16B16A16_SFLOAT,
                vk::Format::R8G8B8A8_UNORM,
            ],
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::COLOR_ATTACHMENT
                | vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::STORAGE_IMAGE,
        )?;
        log::info!("Offscreen color format: {offscreen_color_format:?}");

        let depth_format = context.find_depth_format()?;
        let offscreen_render_pass =
            create_offscreen_render_pass(&context, offscreen_color_format, depth_format)?;

        let extent = renderer.extent();
        let target = create_offscreen_target(
            &context,
            &offscreen_render_pass,
            offscreen_color_format,
            depth_format,
            extent,
        )?;
        let scene_sampler = context.create_render_target_sampler()?;

        // global UBO, one host-visible buffer and set per frame in flight
        let global_set_layout = context
            .descriptor_set_layout_builder()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, GLOBAL_UBO_STAGES)
            .build()?;

        let mut ubo_buffers = vec![];
        let mut global_sets = vec![];
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let buffer = context.create_buffer(
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                std::mem::size_of::<GlobalUbo>() as _,
            )?;
            let set = allocator.allocate(&global_set_layout)?;
            set.update(&[WriteDescriptorSet {
                binding: 0,
                kind: WriteDescriptorSetKind::UniformBuffer { buffer: &buffer },
            }]);
            ubo_buffers.push(buffer);
            global_sets.push(set);
        }

        let mut ubo = GlobalUbo::default();
        ubo.ambient_light_color = environment.ambient_light;

        // passes
        let rt_scene = RtSceneManager::new(&context, &mut allocator)?;

        let shadow = ShadowPass::new(&context, &loader, &mut allocator, config.shadow_map_size)?;
        let forward = ForwardMaterialPass::new(
            &context,
            &loader,
            &mut allocator,
            &global_set_layout,
            &textures,
            shadow.shadow_map(),
            &offscreen_render_pass,
        )?;
        let debug = DebugPass::new(
            &context,
            &loader,
            &global_set_layout,
            &textures,
            &offscreen_render_pass,
        )?;
        let skybox_pass = SkyboxPass::new(
            &context,
            &loader,
            &global_set_layout,
            &skybox,
            &offscreen_render_pass,
        )?;
        let point_lights =
            PointLightPass::new(&context, &loader, &global_set_layout, &offscreen_render_pass)?;

        let path_tracer = PathTracerPass::new(
            &context,
            &loader,
            &mut allocator,
            &PathTracerLayouts {
                global: &global_set_layout,
                textures: &textures,
                materials: materials.descriptor_set_layout(),
                skybox: &skybox,
                rt_scene: &rt_scene,
                blue_noise: &blue_noise,
            },
            &target.color_view,
        )?;
        let denoiser = DenoiserPass::new(&context, &loader, &mut allocator, extent)?;
        let density = DensityVolumePass::new(
            &context,
            &loader,
            &mut allocator,
            config.density_volume_extent,
            config.majorant_grid_extent,
        )?;

        // scene image descriptor the UI layer samples during composition
        let scene_texture_layout = context
            .descriptor_set_layout_builder()
            .add_binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build()?;
        let scene_texture_set = allocator.allocate(&scene_texture_layout)?;
        scene_texture_set.update(&[WriteDescriptorSet {
            binding: 0,
            kind: WriteDescriptorSetKind::CombinedImageSampler {
                view: &target.color_view,
                sampler: &scene_sampler,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        }]);

        let raytracing_enabled = config.raytracing_enabled;
        let denoising_enabled = config.denoising_enabled;

        Ok(Self {
            context,
            config,
            loader,
            allocator,
            meshes,
            textures,
            materials,
            blases: BlasRegistry::new(),
            skybox,
            blue_noise,
            offscreen_color_format,
            offscreen_render_pass,
            target,
            scene_sampler,
            _global_set_layout: global_set_layout,
            ubo_buffers,
            global_sets,
            ubo,
            last_view: Mat4::IDENTITY,
            shadow,
            forward,
            debug,
            skybox_pass,
            point_lights,
            path_tracer,
            denoiser,
            density,
            rt_scene,
            _scene_texture_layout: scene_texture_layout,
            scene_texture_set,
            last_extent: extent,
            raytracing_enabled,
            denoising_enabled,
            debug_enabled: false,
            reload_shaders_requested: false,
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Aspect ratio of the offscreen scene image, for the viewport panel.
    pub fn scene_aspect_ratio(&self) -> f32 {
        self.last_extent.width as f32 / self.last_extent.height as f32
    }

    /// Raw handle the UI layer registers with its texture map.
    pub fn scene_texture(&self) -> vk::DescriptorSet {
        self.scene_texture_set.as_raw()
    }

    pub fn request_shader_reload(&mut self) {
        self.reload_shaders_requested = true;
    }

    pub fn emitter_count(&self) -> u32 {
        self.rt_scene.emitter_count()
    }

    pub fn instance_count(&self) -> u32 {
        self.rt_scene.instance_count()
    }

    /// CPU-side state preparation for the frame about to be recorded.
    pub fn on_update(&mut self, renderer: &Renderer, scene: &mut Scene) -> Result<()> {
        let extent = renderer.extent();
        let frame_index = renderer.frame_index();

        if extent.width != self.last_extent.width || extent.height != self.last_extent.height {
            self.recreate_viewport_resources(extent)?;
        }

        if self.reload_shaders_requested {
            self.reload_shaders()?;
            self.reload_shaders_requested = false;
        }

        // main camera drives projection/view; the path tracer restarts its
        // accumulation whenever the view changes
        let aspect = extent.width as f32 / extent.height as f32;
        if let Some(entity) = scene.main_camera_mut() {
            let translation = entity.transform.as_ref().unwrap().translation;
            let rotation = entity.transform.as_ref().unwrap().rotation;
            let camera = &mut entity.camera.as_mut().unwrap().camera;
            camera.update_projection(aspect);
            camera.set_view_yxz(translation, rotation);

            self.ubo.projection = camera.projection();
            self.ubo.view = camera.view();
            self.ubo.inverse_view = camera.inverse_view();
        }

        if self.ubo.view != self.last_view {
            self.ubo.frame_count = 0;
            self.last_view = self.ubo.view;
        }
        self.ubo.frame_count += 1;

        self.point_lights.update(scene, &mut self.ubo);

        if !self.raytracing_enabled {
            self.shadow.update(frame_index, &self.ubo)?;
        }

        self.materials
            .update(&self.context, frame_index, &self.textures)?;

        if self.raytracing_enabled {
            self.rt_scene.build(
                &self.context,
                frame_index,
                scene,
                &self.meshes,
                &self.materials,
                &self.textures,
                &mut self.blases,
            )?;
        }

        self.ubo_buffers[frame_index].copy_data_to_buffer(std::slice::from_ref(&self.ubo))?;

        Ok(())
    }

    /// Records the frame: density regeneration, the active branch, and the
    /// swap-chain pass the UI draws into. The scene image is guaranteed to be
    /// `SHADER_READ_ONLY` before the swap-chain pass begins.
    pub fn do_render_passes(
        &mut self,
        renderer: &Renderer,
        scene: &Scene,
        frame_time: f32,
        record_ui: impl FnOnce(&CommandBuffer),
    ) -> Result<()> {
        let extent = renderer.extent();
        let frame_index = renderer.frame_index();
        let cmd = renderer.current_command_buffer();

        let frame_info = FrameInfo {
            frame_index,
            frame_time,
            cmd,
            global_set: &self.global_sets[frame_index],
            scene,
        };

        if self.density.needs_regeneration() {
            self.density.generate(&frame_info)?;
        }

        if self.raytracing_enabled {
            self.path_tracer.prepare(&frame_info, &self.target.color_image)?;
            self.path_tracer.render(
                &frame_info,
                extent,
                &self.textures,
                self.materials.descriptor_set(frame_index),
                &self.skybox,
                &self.rt_scene,
                &self.blue_noise,
            );
            self.path_tracer.transition_to_shader_read(
                &frame_info,
                &self.target.color_image,
                vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            )?;

            if self.denoising_enabled {
                self.denoiser.denoise(
                    &frame_info,
                    self.ubo.frame_count,
                    &self.target.color_image,
                    &self.target.color_view,
                    &self.scene_sampler,
                )?;
                // the denoiser leaves the scene image as a transfer target
                self.path_tracer.transition_to_shader_read(
                    &frame_info,
                    &self.target.color_image,
                    vk::PipelineStageFlags2::TRANSFER,
                )?;
            }
        } else {
            self.shadow.render(&frame_info, &self.meshes);

            let clear_values = [
                vk::ClearValue::default(),
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
            ];
            cmd.begin_render_pass(
                &self.offscreen_render_pass,
                &self.target.framebuffer,
                extent,
                &clear_values,
            );

            self.skybox_pass.render(&frame_info, &self.skybox);

            if self.debug_enabled {
                self.debug.render(&frame_info, &self.meshes, &self.textures);
            } else {
                self.forward
                    .render(&frame_info, &self.meshes, &self.materials, &self.textures);
            }

            self.point_lights.render(&frame_info, &self.ubo);

            cmd.end_render_pass();
        }

        renderer.begin_swapchain_render_pass(cmd);
        record_ui(cmd);
        renderer.end_swapchain_render_pass(cmd);

        Ok(())
    }

    /// Host-side work that must happen strictly after the frame's fence, like
    /// the global-majorant readback.
    pub fn post_frame_update(&mut self) -> Result<()> {
        self.density.post_frame_update()
    }

    /// Rebuilds the pipelines of the active branch plus the density
    /// generator; the inactive branch keeps its pipelines untouched.
    fn reload_shaders(&mut self) -> Result<()> {
        self.context.device_wait_idle()?;
        log::info!("Reloading shaders");

        if self.raytracing_enabled {
            self.path_tracer.reload_shaders(&self.context, &self.loader);
            self.denoiser.reload_shaders(&self.context, &self.loader);
        } else {
            self.forward
                .reload_shaders(&self.context, &self.loader, &self.offscreen_render_pass);
            self.debug
                .reload_shaders(&self.context, &self.loader, &self.offscreen_render_pass);
            self.skybox_pass
                .reload_shaders(&self.context, &self.loader, &self.offscreen_render_pass);
            self.point_lights
                .reload_shaders(&self.context, &self.loader, &self.offscreen_render_pass);
            self.shadow.reload_shaders(&self.context, &self.loader);
        }
        self.density.reload_shaders(&self.context, &self.loader);

        Ok(())
    }

    /// Swap-chain extent changed: rebuild the offscreen target, re-point the
    /// path tracer's output binding, resize the denoiser, refresh the UI's
    /// scene texture.
    fn recreate_viewport_resources(&mut self, extent: vk::Extent2D) -> Result<()> {
        self.context.device_wait_idle()?;

        let depth_format = self.context.find_depth_format()?;
        self.target = create_offscreen_target(
            &self.context,
            &self.offscreen_render_pass,
            self.offscreen_color_format,
            depth_format,
            extent,
        )?;

        self.path_tracer.update_scene_image(&self.target.color_view);
        self.denoiser.resize(&self.context, extent)?;

        self.scene_texture_set.update(&[WriteDescriptorSet {
            binding: 0,
            kind: WriteDescriptorSetKind::CombinedImageSampler {
                view: &self.target.color_view,
                sampler: &self.scene_sampler,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        }]);

        self.last_extent = extent;

        Ok(())
    }
}

fn create_offscreen_render_pass(
    context: &Context,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<RenderPass> {
    let attachments = [
        // the color target keeps its previous contents (the path tracer may
        // have written it) and ends up sampleable
        vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build(),
        vk::AttachmentDescription::builder()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build(),
    ];

    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_ref))
        .depth_stencil_attachment(&depth_ref)
        .build();

    let dependencies = [
        vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build(),
        // when the pass ends the image is sampled by the UI
        vk::SubpassDependency::builder()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .build(),
    ];

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(&dependencies);

    context.create_render_pass(&create_info)
}

fn create_offscreen_target(
    context: &Context,
    render_pass: &RenderPass,
    color_format: vk::Format,
    depth_format: vk::Format,
    extent: vk::Extent2D,
) -> Result<OffscreenTarget> {
    let color_image = context.create_image(
        vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::STORAGE
            | vk::ImageUsageFlags::TRANSFER_DST,
        color_format,
        extent.width,
        extent.height,
    )?;

    // the offscreen pass and all samplers expect it readable from the start
    color_image.transition_layout_blocking(
        context,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::PipelineStageFlags2::NONE,
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
    )?;

    let color_view = color_image.create_image_view()?;

    let depth_image = context.create_image(
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        depth_format,
        extent.width,
        extent.height,
    )?;
    let depth_view = depth_image.create_image_view()?;

    let framebuffer =
        context.create_framebuffer(render_pass, &[&color_view, &depth_view], extent)?;

    Ok(OffscreenTarget {
        color_image,
        color_view,
        _depth_image: depth_image,
        _depth_view: depth_view,
        framebuffer,
    })
}
