use anyhow::Result;
use vulkan::ash::vk;
use vulkan::{
    ComputePipeline, ComputePipelineCreateInfo, Context, DescriptorAllocatorGrowable,
    DescriptorSet, DescriptorSetLayout, Image, ImageView, PipelineLayout, Sampler,
    WriteDescriptorSet, WriteDescriptorSetKind,
};

use crate::{FrameInfo, ShaderLoader};

const ACCUMULATION_SHADER: &str = "denoiser/accumulation.comp";
const TEMPORAL_SHADER: &str = "denoiser/temporal.comp";
const SPATIAL_SHADER: &str = "denoiser/spatial.comp";

const WORK_GROUP_SIZE: u32 = 16;

pub const DEFAULT_TEMPORAL_ALPHA: f32 = 0.05;
pub const DEFAULT_SPATIAL_SIGMA_COLOR: f32 = 0.1;
pub const DEFAULT_SPATIAL_SIGMA_SPACE: f32 = 2.0;

#[repr(C)]
#[derive(Clone, Copy)]
struct DenoiserPushConstants {
    frame_count: u32,
    temporal_alpha: f32,
    spatial_sigma_color: f32,
    spatial_sigma_space: f32,
}

pub fn dispatch_counts(extent: vk::Extent2D) -> (u32, u32) {
    (
        (extent.width + WORK_GROUP_SIZE - 1) / WORK_GROUP_SIZE,
        (extent.height + WORK_GROUP_SIZE - 1) / WORK_GROUP_SIZE,
    )
}

struct DenoiserImage {
    image: Image,
    view: ImageView,
}

impl DenoiserImage {
    fn new(context: &Context, extent: vk::Extent2D) -> Result<Self> {
        let image = context.create_image(
            vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::Format::R16G16B16A16_SFLOAT,
            extent.width,
            extent.height,
        )?;
        let view = image.create_image_view()?;

        Ok(Self { image, view })
    }
}

/// Three compute passes over shared float images:
///
/// 1. accumulation: EMA of the raw samples, reset when `frame_count` is 1;
/// 2. temporal: blends accumulation against last frame's history;
/// 3. spatial: bilateral filter writing the new history.
///
/// The history is then copied into the scene image for presentation.
pub struct DenoiserPass {
    extent: vk::Extent2D,
    accumulation: DenoiserImage,
    history: DenoiserImage,
    scratch: DenoiserImage,
    sampler: Sampler,

    _accumulation_layout: DescriptorSetLayout,
    accumulation_set: DescriptorSet,
    _temporal_layout: DescriptorSetLayout,
    temporal_set: DescriptorSet,
    _spatial_layout: DescriptorSetLayout,
    spatial_set: DescriptorSet,

    accumulation_pipeline_layout: PipelineLayout,
    accumulation_pipeline: ComputePipeline,
    temporal_pipeline_layout: PipelineLayout,
    temporal_pipeline: ComputePipeline,
    spatial_pipeline_layout: PipelineLayout,
    spatial_pipeline: ComputePipeline,

    pub temporal_alpha: f32,
    pub spatial_sigma_color: f32,
    pub spatial_sigma_space: f32,
}

impl DenoiserPass {
    pub fn new(
        context: &Context,
        loader: &ShaderLoader,
        allocator: &mut DescriptorAllocatorGrowable,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let accumulation = DenoiserImage::new(context, extent)?;
        let history = DenoiserImage::new(context, extent)?;
        let scratch = DenoiserImage::new(context, extent)?;
        let sampler = context.create_unnormalized_nearest_sampler()?;

        let compute = vk::ShaderStageFlags::COMPUTE;

        // binding 0: noisy input (sampled), binding 1: accumulation (storage)
        let accumulation_layout = context
            .descriptor_set_layout_builder()
            .add_binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, compute)
            .add_binding(1, vk::DescriptorType::STORAGE_IMAGE, compute)
            .build()?;
        // 0: accumulation, 1: history, 2: noisy input, 3: scratch output
        let temporal_layout = context
            .descriptor_set_layout_builder()
            .add_binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, compute)
            .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, compute)
            .add_binding(2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, compute)
            .add_binding(3, vk::DescriptorType::STORAGE_IMAGE, compute)
            .build()?;
        // 0: scratch, 1: noisy input (guidance), 2: history output
        let spatial_layout = context
            .descriptor_set_layout_builder()
            .add_binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, compute)
            .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, compute)
            .add_binding(2, vk::DescriptorType::STORAGE_IMAGE, compute)
            .build()?;

        let accumulation_set = allocator.allocate(&accumulation_layout)?;
        let temporal_set = allocator.allocate(&temporal_layout)?;
        let spatial_set = allocator.allocate(&spatial_layout)?;

        let push_range = vk::PushConstantRange::builder()
            .stage_flags(compute)
            .size(std::mem::size_of::<DenoiserPushConstants>() as u32)
            .build();

        let accumulation_pipeline_layout =
            context.create_pipeline_layout(&[&accumulation_layout], &[push_range])?;
        let temporal_pipeline_layout =
            context.create_pipeline_layout(&[&temporal_layout], &[push_range])?;
        let spatial_pipeline_layout =
            context.create_pipeline_layout(&[&spatial_layout], &[push_range])?;

        let accumulation_pipeline =
            create_pipeline(context, loader, &accumulation_pipeline_layout, ACCUMULATION_SHADER)?;
        let temporal_pipeline =
            create_pipeline(context, loader, &temporal_pipeline_layout, TEMPORAL_SHADER)?;
        let spatial_pipeline =
            create_pipeline(context, loader, &spatial_pipeline_layout, SPATIAL_SHADER)?;

        Ok(Self {
            extent,
            accumulation,
            history,
            scratch,
            sampler,
            _accumulation_layout: accumulation_layout,
            accumulation_set,
            _temporal_layout: temporal_layout,
            temporal_set,
            _spatial_layout: spatial_layout,
            spatial_set,
            accumulation_pipeline_layout,
            accumulation_pipeline,
            temporal_pipeline_layout,
            temporal_pipeline,
            spatial_pipeline_layout,
            spatial_pipeline,
            temporal_alpha: DEFAULT_TEMPORAL_ALPHA,
            spatial_sigma_color: DEFAULT_SPATIAL_SIGMA_COLOR,
            spatial_sigma_space: DEFAULT_SPATIAL_SIGMA_SPACE,
        })
    }

    /// Recreates the working images for a new swap-chain extent. The device
    /// must be idle.
    pub fn resize(&mut self, context: &Context, extent: vk::Extent2D) -> Result<()> {
        self.accumulation = DenoiserImage::new(context, extent)?;
        self.history = DenoiserImage::new(context, extent)?;
        self.scratch = DenoiserImage::new(context, extent)?;
        self.extent = extent;

        Ok(())
    }

    /// Runs the three passes on the scene image and copies the filtered
    /// history back into it. On return the scene image is in
    /// `TRANSFER_DST_OPTIMAL`; the caller transitions it for sampling.
    pub fn denoise(
        &self,
        frame_info: &FrameInfo,
        frame_count: u32,
        scene_image: &Image,
        scene_view: &ImageView,
        scene_sampler: &Sampler,
    ) -> Result<()> {
        let cmd = frame_info.cmd;
        let (groups_x, groups_y) = dispatch_counts(self.extent);
        let compute = vk::PipelineStageFlags2::COMPUTE_SHADER;

        let push = DenoiserPushConstants {
            frame_count,
            temporal_alpha: self.temporal_alpha,
            spatial_sigma_color: self.spatial_sigma_color,
            spatial_sigma_space: self.spatial_sigma_space,
        };

        // pass 1: accumulation
        self.accumulation
            .image
            .transition_layout(cmd, vk::ImageLayout::GENERAL, compute, compute)?;

        self.accumulation_set.update(&[
            WriteDescriptorSet {
                binding: 0,
                kind: WriteDescriptorSetKind::CombinedImageSampler {
                    view: scene_view,
                    sampler: scene_sampler,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            },
            WriteDescriptorSet {
                binding: 1,
                kind: WriteDescriptorSetKind::StorageImage {
                    view: &self.accumulation.view,
                    layout: vk::ImageLayout::GENERAL,
                },
            },
        ]);

        cmd.bind_compute_pipeline(&self.accumulation_pipeline);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::COMPUTE,
            &self.accumulation_pipeline_layout,
            0,
            &[&self.accumulation_set],
        );
        cmd.push_constants(
            &self.accumulation_pipeline_layout,
            vk::ShaderStageFlags::COMPUTE,
            &push,
        );
        cmd.dispatch(groups_x, groups_y, 1);

        // pass 2: temporal blend into the scratch image
        self.accumulation.image.transition_layout(
            cmd,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            compute,
            compute,
        )?;
        self.history.image.transition_layout(
            cmd,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            compute,
            compute,
        )?;
        self.scratch
            .image
            .transition_layout(cmd, vk::ImageLayout::GENERAL, compute, compute)?;

        self.temporal_set.update(&[
            WriteDescriptorSet {
                binding: 0,
                kind: WriteDescriptorSetKind::CombinedImageSampler {
                    view: &self.accumulation.view,
                    sampler: &self.sampler,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            },
            WriteDescriptorSet {
                binding: 1,
                kind: WriteDescriptorSetKind::CombinedImageSampler {
                    view: &self.history.view,
                    sampler: &self.sampler,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            },
            WriteDescriptorSet {
                binding: 2,
                kind: WriteDescriptorSetKind::CombinedImageSampler {
                    view: scene_view,
                    sampler: scene_sampler,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            },
            WriteDescriptorSet {
                binding: 3,
                kind: WriteDescriptorSetKind::StorageImage {
                    view: &self.scratch.view,
                    layout: vk::ImageLayout::GENERAL,
                },
            },
        ]);

        cmd.bind_compute_pipeline(&self.temporal_pipeline);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::COMPUTE,
            &self.temporal_pipeline_layout,
            0,
            &[&self.temporal_set],
        );
        cmd.push_constants(
            &self.temporal_pipeline_layout,
            vk::ShaderStageFlags::COMPUTE,
            &push,
        );
        cmd.dispatch(groups_x, groups_y, 1);

        // pass 3: spatial filter writing the new history
        self.scratch.image.transition_layout(
            cmd,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            compute,
            compute,
        )?;
        self.history
            .image
            .transition_layout(cmd, vk::ImageLayout::GENERAL, compute, compute)?;

        self.spatial_set.update(&[
            WriteDescriptorSet {
                binding: 0,
                kind: WriteDescriptorSetKind::CombinedImageSampler {
                    view: &self.scratch.view,
                    sampler: &self.sampler,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            },
            WriteDescriptorSet {
                binding: 1,
                kind: WriteDescriptorSetKind::CombinedImageSampler {
                    view: scene_view,
                    sampler: scene_sampler,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            },
            WriteDescriptorSet {
                binding: 2,
                kind: WriteDescriptorSetKind::StorageImage {
                    view: &self.history.view,
                    layout: vk::ImageLayout::GENERAL,
                },
            },
        ]);

        cmd.bind_compute_pipeline(&self.spatial_pipeline);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::COMPUTE,
            &self.spatial_pipeline_layout,
            0,
            &[&self.spatial_set],
        );
        cmd.push_constants(
            &self.spatial_pipeline_layout,
            vk::ShaderStageFlags::COMPUTE,
            &push,
        );
        cmd.dispatch(groups_x, groups_y, 1);

        // hand the filtered history to the scene image for presentation
        self.history.image.transition_layout(
            cmd,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            compute,
            vk::PipelineStageFlags2::TRANSFER,
        )?;
        scene_image.transition_layout(
            cmd,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::PipelineStageFlags2::TRANSFER,
        )?;

        cmd.copy_image(
            &self.history.image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            scene_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        // the history is sampled again next frame
        self.history.image.transition_layout(
            cmd,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::PipelineStageFlags2::TRANSFER,
            compute,
        )?;

        Ok(())
    }

    pub fn reload_shaders(&mut self, context: &Context, loader: &ShaderLoader) {
        let rebuilt = create_pipeline(
            context,
            loader,
            &self.accumulation_pipeline_layout,
            ACCUMULATION_SHADER,
        )
        .and_then(|accumulation| {
            let temporal =
                create_pipeline(context, loader, &self.temporal_pipeline_layout, TEMPORAL_SHADER)?;
            let spatial =
                create_pipeline(context, loader, &self.spatial_pipeline_layout, SPATIAL_SHADER)?;
            Ok((accumulation, temporal, spatial))
        });

        match rebuilt {
            Ok((accumulation, temporal, spatial)) => {
                self.accumulation_pipeline = accumulation;
                self.temporal_pipeline = temporal;
                self.spatial_pipeline = spatial;
            }
            Err(err) => log::error!("Denoiser pipeline reload failed, keeping previous: {err:#}"),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_covers_the_whole_extent() {
        let (x, y) = dispatch_counts(vk::Extent2D {
            width: 1280,
            height: 720,
        });
        assert_eq!((x, y), (80, 45));

        // non-multiples round up
        let (x, y) = dispatch_counts(vk::Extent2D {
            width: 1281,
            height: 721,
        });
        assert_eq!((x, y), (81, 46));
    }

    #[test]
    fn default_filter_parameters_match_the_tuned_values() {
        assert_eq!(DEFAULT_TEMPORAL_ALPHA, 0.05);
        assert_eq!(DEFAULT_SPATIAL_SIGMA_COLOR, 0.1);
        assert_eq!(DEFAULT_SPATIAL_SIGMA_SPACE, 2.0);
    }
}
