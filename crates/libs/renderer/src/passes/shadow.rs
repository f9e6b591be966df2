use anyhow::Result;
use glam::{Mat4, Vec3};
use vulkan::ash::vk;
use vulkan::gpu_allocator::MemoryLocation;
use vulkan::{
    Buffer, Context, DescriptorAllocatorGrowable, DescriptorSet, DescriptorSetLayout,
    Framebuffer, GraphicsPipeline, GraphicsPipelineCreateInfo, GraphicsShaderCreateInfo, Image,
    ImageView, PipelineLayout, RenderPass, Sampler, WriteDescriptorSet, WriteDescriptorSetKind,
    MAX_FRAMES_IN_FLIGHT,
};

use crate::{FrameInfo, GlobalUbo, MeshRegistry, MeshVertexPositionOnly, PointLightData,
    ShaderLoader, MAX_LIGHTS};

const VERT_SHADER: &str = "shadow_cube.vert";
const FRAG_SHADER: &str = "shadow_cube.frag";

/// Distance-to-light is stored in a single-channel float face.
const SHADOW_COLOR_FORMAT: vk::Format = vk::Format::R32_SFLOAT;

pub const SHADOW_Z_NEAR: f32 = 0.1;
pub const SHADOW_Z_FAR: f32 = 50.0;

pub const CUBE_FACE_COUNT: usize = 6;

#[repr(C)]
#[derive(Clone, Copy)]
struct ShadowPushConstants {
    model: Mat4,
    cube_face_view: Mat4,
}

/// Light-space uniforms, one buffer per frame in flight.
#[repr(C)]
#[derive(Clone, Copy)]
struct ShadowUbo {
    projection: Mat4,
    /// Translates world coordinates into light-origin coordinates so the
    /// fragment shader stores distance relative to the light.
    light_origin_model: Mat4,
    point_lights: [PointLightData; MAX_LIGHTS],
    num_lights: i32,
    _pad: [u32; 3],
}

/// Rotation-only view matrix for one face of the shadow cube.
pub fn face_view_matrix(face: usize) -> Mat4 {
    let deg = |d: f32| d.to_radians();
    match face {
        // +X
        0 => Mat4::from_axis_angle(Vec3::Y, deg(90.0)) * Mat4::from_axis_angle(Vec3::X, deg(180.0)),
        // -X
        1 => {
            Mat4::from_axis_angle(Vec3::Y, deg(-90.0)) * Mat4::from_axis_angle(Vec3::X, deg(180.0))
        }
        // +Y
        2 => Mat4::from_axis_angle(Vec3::X, deg(-90.0)),
        // -Y
        3 => Mat4::from_axis_angle(Vec3::X, deg(90.0)),
        // +Z
        4 => Mat4::from_axis_angle(Vec3::X, deg(180.0)),
        // -Z
        5 => Mat4::from_axis_angle(Vec3::Z, deg(180.0)),
        _ => unreachable!("cube has six faces"),
    }
}

/// Square 90-degree projection used for every cube face.
fn face_projection() -> Mat4 {
    let tan_half = (std::f32::consts::FRAC_PI_2 / 2.0).tan();
    let mut m = Mat4::ZERO.to_cols_array_2d();
    m[0][0] = 1.0 / tan_half;
    m[1][1] = 1.0 / tan_half;
    m[2][2] = SHADOW_Z_FAR / (SHADOW_Z_FAR - SHADOW_Z_NEAR);
    m[2][3] = 1.0;
    m[3][2] = -(SHADOW_Z_FAR * SHADOW_Z_NEAR) / (SHADOW_Z_FAR - SHADOW_Z_NEAR);
    Mat4::from_cols_array_2d(&m)
}

/// Omnidirectional shadow map: a cube image with six framebuffers sharing a
/// depth attachment, rendered once per face for the first point light.
pub struct ShadowPass {
    size: u32,
    render_pass: RenderPass,
    cube_image: Image,
    cube_view: ImageView,
    cube_sampler: Sampler,
    face_views: Vec<ImageView>,
    _depth_image: Image,
    _depth_view: ImageView,
    face_framebuffers: Vec<Framebuffer>,

    ubo_layout: DescriptorSetLayout,
    ubo_buffers: Vec<Buffer>,
    ubo_sets: Vec<DescriptorSet>,

    pipeline_layout: PipelineLayout,
    pipeline: GraphicsPipeline,
}

impl ShadowPass {
    pub fn new(
        context: &Context,
        loader: &ShaderLoader,
        allocator: &mut DescriptorAllocatorGrowable,
        size: u32,
    ) -> Result<Self> {
        let depth_format = context.find_depth_format()?;
        let render_pass = create_render_pass(context, depth_format)?;

        let cube_image = context.create_cubemap_image(
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            SHADOW_COLOR_FORMAT,
            size,
        )?;
        let cube_view = cube_image.create_cubemap_view()?;
        let cube_sampler = context.create_render_target_sampler()?;
        let face_views = (0..CUBE_FACE_COUNT as u32)
            .map(|face| cube_image.create_face_view(face))
            .collect::<Result<Vec<_>>>()?;

        let depth_image = context.create_image(
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            depth_format,
            size,
            size,
        )?;
        depth_image.transition_layout_blocking(
            context,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags2::NONE,
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS,
        )?;
        let depth_view = depth_image.create_image_view()?;

        let extent = vk::Extent2D {
            width: size,
            height: size,
        };
        let face_framebuffers = face_views
            .iter()
            .map(|face_view| {
                context.create_framebuffer(&render_pass, &[face_view, &depth_view], extent)
            })
            .collect::<Result<Vec<_>>>()?;

        let ubo_layout = context
            .descriptor_set_layout_builder()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )
            .build()?;

        let mut ubo_buffers = vec![];
        let mut ubo_sets = vec![];
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let buffer = context.create_buffer(
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                std::mem::size_of::<ShadowUbo>() as _,
            )?;
            let set = allocator.allocate(&ubo_layout)?;
            set.update(&[WriteDescriptorSet {
                binding: 0,
                kind: WriteDescriptorSetKind::UniformBuffer { buffer: &buffer },
            }]);
            ubo_buffers.push(buffer);
            ubo_sets.push(set);
        }

        let push_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .size(std::mem::size_of::<ShadowPushConstants>() as u32)
            .build();
        let pipeline_layout = context.create_pipeline_layout(&[&ubo_layout], &[push_range])?;
        let pipeline = create_pipeline(context, loader, &pipeline_layout, &render_pass)?;

        Ok(Self {
            size,
            render_pass,
            cube_image,
            cube_view,
            cube_sampler,
            face_views,
            _depth_image: depth_image,
            _depth_view: depth_view,
            face_framebuffers,
            ubo_layout,
            ubo_buffers,
            ubo_sets,
            pipeline_layout,
            pipeline,
        })
    }

    pub fn shadow_map(&self) -> (&ImageView, &Sampler) {
        (&self.cube_view, &self.cube_sampler)
    }

    pub fn face_view(&self, face: usize) -> &ImageView {
        &self.face_views[face]
    }

    pub fn ubo_layout(&self) -> &DescriptorSetLayout {
        &self.ubo_layout
    }

    /// Writes the light-space UBO for the frame being recorded. Only the
    /// first point light casts shadows.
    pub fn update(&self, frame_index: usize, ubo: &GlobalUbo) -> Result<()> {
        let light_pos = ubo.point_lights[0].position;

        let shadow_ubo = ShadowUbo {
            projection: face_projection(),
            light_origin_model: Mat4::from_translation(-light_pos.truncate()),
            point_lights: ubo.point_lights,
            num_lights: ubo.num_lights,
            _pad: [0; 3],
        };

        self.ubo_buffers[frame_index].copy_data_to_buffer(std::slice::from_ref(&shadow_ubo))
    }

    /// Records the six per-face raster passes.
    pub fn render(&self, frame_info: &FrameInfo, meshes: &MeshRegistry) {
        let cmd = frame_info.cmd;
        let extent = vk::Extent2D {
            width: self.size,
            height: self.size,
        };
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [SHADOW_Z_FAR, 0.0, 0.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        for face in 0..CUBE_FACE_COUNT {
            cmd.begin_render_pass(
                &self.render_pass,
                &self.face_framebuffers[face],
                extent,
                &clear_values,
            );

            cmd.bind_graphics_pipeline(&self.pipeline);
            cmd.bind_descriptor_sets(
                vk::PipelineBindPoint::GRAPHICS,
                &self.pipeline_layout,
                0,
                &[&self.ubo_sets[frame_info.frame_index]],
            );

            let face_view = face_view_matrix(face);
            for entity in frame_info.scene.entities() {
                let (Some(transform), Some(mesh_component)) =
                    (entity.transform.as_ref(), entity.mesh.as_ref())
                else {
                    continue;
                };
                let Some(mesh) = meshes.get(mesh_component.mesh) else {
                    continue;
                };

                let push = ShadowPushConstants {
                    model: transform.mat4(),
                    cube_face_view: face_view,
                };
                cmd.push_constants(&self.pipeline_layout, vk::ShaderStageFlags::VERTEX, &push);

                mesh.bind(cmd);
                mesh.draw(cmd);
            }

            cmd.end_render_pass();
        }
    }

    pub fn reload_shaders(&mut self, context: &Context, loader: &ShaderLoader) {
        match create_pipeline(context, loader, &self.pipeline_layout, &self.render_pass) {
            Ok(pipeline) => self.pipeline = pipeline,
            Err(err) => log::error!("Shadow pipeline reload failed, keeping previous: {err:#}"),
        }
    }
}

fn create_render_pass(context: &Context, depth_format: vk::Format) -> Result<RenderPass> {
    let attachments = [
        vk::AttachmentDescription::builder()
            .format(SHADOW_COLOR_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build(),
        vk::AttachmentDescription::builder()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
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

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass));

    context.create_render_pass(&create_info)
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

    context.create_graphics_pipeline::<MeshVertexPositionOnly>(pipeline_layout, create_info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_views_are_pure_rotations() {
        for face in 0..CUBE_FACE_COUNT {
            let m = face_view_matrix(face);
            assert!((m.determinant() - 1.0).abs() < 1e-5, "face {face}");
            // rotation-only: translation column stays zero
            assert_eq!(m.col(3).truncate(), Vec3::ZERO);
        }
    }

    #[test]
    fn face_views_look_along_each_axis() {
        // the -Z axis of the view rotation ends up facing the cube direction
        let forward = |face: usize| (face_view_matrix(face).inverse() * glam::Vec4::Z).truncate();

        assert!((forward(0) - Vec3::X).length() < 1e-5 || (forward(0) + Vec3::X).length() < 1e-5);
        assert!((forward(2) - Vec3::Y).length() < 1e-5 || (forward(2) + Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn shadow_projection_covers_the_fixed_range() {
        let proj = face_projection();
        let near = proj * glam::Vec4::new(0.0, 0.0, SHADOW_Z_NEAR, 1.0);
        let far = proj * glam::Vec4::new(0.0, 0.0, SHADOW_Z_FAR, 1.0);
        assert!((near.z / near.w).abs() < 1e-6);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shadow_ubo_is_std140_sized() {
        assert_eq!(
            std::mem::size_of::<ShadowUbo>(),
            2 * 64 + MAX_LIGHTS * 32 + 16
        );
    }
}
