use anyhow::Result;
use vulkan::ash::vk;
use vulkan::gpu_allocator::MemoryLocation;
use vulkan::{
    Buffer, ComputePipeline, ComputePipelineCreateInfo, Context, DescriptorAllocatorGrowable,
    DescriptorSet, DescriptorSetLayout, Image, ImageView, MemoryBarrier, PipelineLayout, Sampler,
    WriteDescriptorSet, WriteDescriptorSetKind,
};

use crate::{FrameInfo, ShaderLoader};

const GENERATION_SHADER: &str = "volume/density_generate.comp";
const MAJORANT_SHADER: &str = "volume/global_majorant.comp";

#[repr(C)]
#[derive(Clone, Copy)]
struct DensityPushConstants {
    noise_frequency: f32,
    worley_exponent: f32,
}

/// Procedural density field for the volumetric path tracer: a 3D density
/// texture, a coarse majorant grid holding per-cell maxima for delta
/// tracking, and a host-readable global majorant.
///
/// Regeneration is an edge trigger raised from the UI; the orchestrator
/// dispatches the compute work at the start of the next frame.
pub struct DensityVolumePass {
    density_extent: vk::Extent3D,
    majorant_extent: vk::Extent3D,

    density_image: Image,
    _density_view: ImageView,
    density_slice_view: ImageView,
    majorant_image: Image,
    _majorant_view: ImageView,
    majorant_slice_view: ImageView,
    _sampler: Sampler,

    global_majorant_buffer: Buffer,
    global_majorant: f32,

    _generation_layout: DescriptorSetLayout,
    generation_set: DescriptorSet,
    sampling_layout: DescriptorSetLayout,
    sampling_set: DescriptorSet,

    generation_pipeline_layout: PipelineLayout,
    generation_pipeline: ComputePipeline,
    majorant_pipeline_layout: PipelineLayout,
    majorant_pipeline: ComputePipeline,

    pub noise_frequency: f32,
    pub worley_exponent: f32,
    needs_regeneration: bool,
    density_slice_index: u32,
}

impl DensityVolumePass {
    pub fn new(
        context: &Context,
        loader: &ShaderLoader,
        allocator: &mut DescriptorAllocatorGrowable,
        density_extent: vk::Extent3D,
        majorant_extent: vk::Extent3D,
    ) -> Result<Self> {
        // one generator workgroup covers exactly one majorant cell
        anyhow::ensure!(
            density_extent.width % majorant_extent.width == 0
                && density_extent.height % majorant_extent.height == 0
                && density_extent.depth % majorant_extent.depth == 0,
            "majorant grid must divide the density extent"
        );

        let usage = vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED;

        let density_image =
            context.create_image_3d(usage, vk::Format::R32_SFLOAT, density_extent)?;
        let density_view = density_image.create_3d_view()?;
        let density_slice_view = density_image.create_slice_view(0)?;

        let majorant_image =
            context.create_image_3d(usage, vk::Format::R32_SFLOAT, majorant_extent)?;
        let majorant_view = majorant_image.create_3d_view()?;
        let majorant_slice_view = majorant_image.create_slice_view(0)?;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST);
        let sampler = context.create_sampler(&sampler_info)?;

        // host-visible so post_frame_update can read it back
        let global_majorant_buffer = context.create_buffer(
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::CpuToGpu,
            std::mem::size_of::<f32>() as _,
        )?;
        global_majorant_buffer.copy_data_to_buffer(&[0.0f32])?;

        let compute = vk::ShaderStageFlags::COMPUTE;
        let generation_layout = context
            .descriptor_set_layout_builder()
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE, compute)
            .add_binding(1, vk::DescriptorType::STORAGE_IMAGE, compute)
            .add_binding(2, vk::DescriptorType::STORAGE_BUFFER, compute)
            .build()?;

        let sampling_stages = vk::ShaderStageFlags::FRAGMENT
            | vk::ShaderStageFlags::RAYGEN_KHR
            | vk::ShaderStageFlags::CLOSEST_HIT_KHR;
        let sampling_layout = context
            .descriptor_set_layout_builder()
            .add_binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, sampling_stages)
            .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, sampling_stages)
            .add_binding(
                2,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            )
            .build()?;

        let generation_set = allocator.allocate(&generation_layout)?;
        generation_set.update(&[
            WriteDescriptorSet {
                binding: 0,
                kind: WriteDescriptorSetKind::StorageImage {
                    view: &density_view,
                    layout: vk::ImageLayout::GENERAL,
                },
            },
            WriteDescriptorSet {
                binding: 1,
                kind: WriteDescriptorSetKind::StorageImage {
                    view: &majorant_view,
                    layout: vk::ImageLayout::GENERAL,
                },
            },
            WriteDescriptorSet {
                binding: 2,
                kind: WriteDescriptorSetKind::StorageBuffer {
                    buffer: &global_majorant_buffer,
                },
            },
        ]);

        let sampling_set = allocator.allocate(&sampling_layout)?;
        sampling_set.update(&[
            WriteDescriptorSet {
                binding: 0,
                kind: WriteDescriptorSetKind::CombinedImageSampler {
                    view: &density_view,
                    sampler: &sampler,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            },
            WriteDescriptorSet {
                binding: 1,
                kind: WriteDescriptorSetKind::CombinedImageSampler {
                    view: &majorant_view,
                    sampler: &sampler,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            },
            WriteDescriptorSet {
                binding: 2,
                kind: WriteDescriptorSetKind::StorageBuffer {
                    buffer: &global_majorant_buffer,
                },
            },
        ]);

        let push_range = vk::PushConstantRange::builder()
            .stage_flags(compute)
            .size(std::mem::size_of::<DensityPushConstants>() as u32)
            .build();

        let generation_pipeline_layout =
            context.create_pipeline_layout(&[&generation_layout], &[push_range])?;
        let majorant_pipeline_layout =
            context.create_pipeline_layout(&[&generation_layout], &[])?;

        let generation_pipeline = create_pipeline(
            context,
            loader,
            &generation_pipeline_layout,
            GENERATION_SHADER,
        )?;
        let majorant_pipeline =
            create_pipeline(context, loader, &majorant_pipeline_layout, MAJORANT_SHADER)?;

        Ok(Self {
            density_extent,
            majorant_extent,
            density_image,
            _density_view: density_view,
            density_slice_view,
            majorant_image,
            _majorant_view: majorant_view,
            majorant_slice_view,
            _sampler: sampler,
            global_majorant_buffer,
            global_majorant: 0.0,
            _generation_layout: generation_layout,
            generation_set,
            sampling_layout,
            sampling_set,
            generation_pipeline_layout,
            generation_pipeline,
            majorant_pipeline_layout,
            majorant_pipeline,
            noise_frequency: 8.0,
            worley_exponent: 1.0,
            needs_regeneration: true,
            density_slice_index: 0,
        })
    }

    pub fn needs_regeneration(&self) -> bool {
        self.needs_regeneration
    }

    pub fn request_regeneration(&mut self) {
        self.needs_regeneration = true;
    }

    pub fn sampling_layout(&self) -> &DescriptorSetLayout {
        &self.sampling_layout
    }

    pub fn sampling_set(&self) -> &DescriptorSet {
        &self.sampling_set
    }

    pub fn global_majorant(&self) -> f32 {
        self.global_majorant
    }

    /// Debug views of one z-slice of each 3D texture.
    pub fn slice_views(&self) -> (&ImageView, &ImageView) {
        (&self.density_slice_view, &self.majorant_slice_view)
    }

    /// Points the slice views at a different depth. Waits for the device;
    /// only reachable from the debug UI.
    pub fn set_slice_index(&mut self, context: &Context, slice: u32) -> Result<()> {
        let slice = slice.min(self.density_extent.depth - 1);
        if slice == self.density_slice_index {
            return Ok(());
        }

        context.device_wait_idle()?;
        self.density_slice_view = self.density_image.create_slice_view(slice)?;
        self.majorant_slice_view = self
            .majorant_image
            .create_slice_view(slice / (self.density_extent.depth / self.majorant_extent.depth))?;
        self.density_slice_index = slice;

        Ok(())
    }

    /// Regenerates the density texture and both majorants. One workgroup per
    /// majorant cell; the workgroup edge equals the density/majorant ratio.
    pub fn generate(&mut self, frame_info: &FrameInfo) -> Result<()> {
        let cmd = frame_info.cmd;
        let compute = vk::PipelineStageFlags2::COMPUTE_SHADER;

        self.density_image.transition_layout(
            cmd,
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            compute,
        )?;
        self.majorant_image.transition_layout(
            cmd,
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            compute,
        )?;

        cmd.bind_compute_pipeline(&self.generation_pipeline);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::COMPUTE,
            &self.generation_pipeline_layout,
            0,
            &[&self.generation_set],
        );

        let push = DensityPushConstants {
            noise_frequency: self.noise_frequency,
            worley_exponent: self.worley_exponent,
        };
        cmd.push_constants(
            &self.generation_pipeline_layout,
            vk::ShaderStageFlags::COMPUTE,
            &push,
        );

        cmd.dispatch(
            self.majorant_extent.width,
            self.majorant_extent.height,
            self.majorant_extent.depth,
        );

        // per-cell maxima are in place; reduce them into the scalar majorant
        cmd.pipeline_memory_barrier(MemoryBarrier {
            src_access_mask: vk::AccessFlags2::SHADER_WRITE,
            dst_access_mask: vk::AccessFlags2::SHADER_READ,
            src_stage_mask: compute,
            dst_stage_mask: compute,
        });

        cmd.bind_compute_pipeline(&self.majorant_pipeline);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::COMPUTE,
            &self.majorant_pipeline_layout,
            0,
            &[&self.generation_set],
        );
        cmd.dispatch(
            self.majorant_extent.width,
            self.majorant_extent.height,
            self.majorant_extent.depth,
        );

        // the host reads the scalar majorant after this frame's fence
        cmd.pipeline_memory_barrier(MemoryBarrier {
            src_access_mask: vk::AccessFlags2::SHADER_WRITE,
            dst_access_mask: vk::AccessFlags2::HOST_READ,
            src_stage_mask: compute,
            dst_stage_mask: vk::PipelineStageFlags2::HOST,
        });

        self.density_image.transition_layout(
            cmd,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            compute,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        )?;
        self.majorant_image.transition_layout(
            cmd,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            compute,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        )?;

        self.needs_regeneration = false;

        Ok(())
    }

    /// Reads the global majorant back; call strictly after the fence of the
    /// frame that ran the reduction has signalled.
    pub fn post_frame_update(&mut self) -> Result<()> {
        self.global_majorant = self.global_majorant_buffer.read_data_from_buffer::<f32>(1)?[0];
        Ok(())
    }

    pub fn reload_shaders(&mut self, context: &Context, loader: &ShaderLoader) {
        let rebuilt = create_pipeline(
            context,
            loader,
            &self.generation_pipeline_layout,
            GENERATION_SHADER,
        )
        .and_then(|generation| {
            let majorant =
                create_pipeline(context, loader, &self.majorant_pipeline_layout, MAJORANT_SHADER)?;
            Ok((generation, majorant))
        });

        match rebuilt {
            Ok((generation, majorant)) => {
                self.generation_pipeline = generation;
                self.majorant_pipeline = majorant;
            }
            Err(err) => {
                log::error!("Density pipeline reload failed, keeping previous: {err:#}")
            }
        }
    }
}

fn create_pipeline(
    context: &Context,
    loader: &ShaderLoader,
    layout: &PipelineLayout,
    shader: &str,
) -> Result<ComputePipeline> {
    let source = loader.load(shader)?;
    context.create_compute_pipeline(
        layout,
        ComputePipelineCreateInfo {
            shader_source: &source,
        },
    )
}
