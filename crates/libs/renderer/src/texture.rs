use anyhow::Result;
use scene::{Environment, ImageData};
use vulkan::ash::vk;
use vulkan::gpu_allocator::MemoryLocation;
use vulkan::{
    Context, DescriptorAllocatorGrowable, DescriptorSet, DescriptorSetLayout, Image, ImageView,
    Sampler, WriteDescriptorSet, WriteDescriptorSetKind,
};

/// Sampled 2D texture: image, view and its own sampler.
pub struct Texture2D {
    pub image: Image,
    pub view: ImageView,
    pub sampler: Sampler,
}

fn upload_pixels(
    context: &Context,
    image: &Image,
    pixels: &[u8],
    base_layer: u32,
) -> Result<()> {
    let staging = context.create_buffer(
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        pixels.len() as _,
    )?;
    staging.copy_data_to_buffer(pixels)?;

    context.execute_one_time_commands(|cmd| {
        image.transition_layout(
            cmd,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::PipelineStageFlags2::NONE,
            vk::PipelineStageFlags2::TRANSFER,
        )?;
        cmd.copy_buffer_to_image_layers(
            &staging,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            base_layer,
            1,
        );
        image.transition_layout(
            cmd,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::PipelineStageFlags2::TRANSFER,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
        )
    })??;

    Ok(())
}

impl Texture2D {
    pub fn from_image_data(context: &Context, data: &ImageData) -> Result<Self> {
        Self::new(context, data, false)
    }

    /// Nearest-filter unnormalized-coordinates variant for the blue-noise
    /// textures the raygen shader indexes by pixel.
    pub fn from_image_data_unnormalized(context: &Context, data: &ImageData) -> Result<Self> {
        Self::new(context, data, true)
    }

    fn new(context: &Context, data: &ImageData, unnormalized: bool) -> Result<Self> {
        let image = context.create_image(
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::Format::R8G8B8A8_UNORM,
            data.width,
            data.height,
        )?;

        upload_pixels(context, &image, &data.pixels, 0)?;

        let view = image.create_image_view()?;
        let sampler = if unnormalized {
            context.create_unnormalized_nearest_sampler()?
        } else {
            let info = vk::SamplerCreateInfo::builder()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::REPEAT)
                .address_mode_v(vk::SamplerAddressMode::REPEAT)
                .address_mode_w(vk::SamplerAddressMode::REPEAT)
                .anisotropy_enable(true)
                .max_anisotropy(context.physical_device.limits.max_sampler_anisotropy)
                .mipmap_mode(vk::SamplerMipmapMode::LINEAR);
            context.create_sampler(&info)?
        };

        Ok(Self {
            image,
            view,
            sampler,
        })
    }

    pub fn load_png(context: &Context, path: &std::path::Path) -> Result<Self> {
        let data = load_png(path)?;
        Self::from_image_data(context, &data)
    }
}

pub fn load_png(path: &std::path::Path) -> Result<ImageData> {
    let decoded = image::open(path)?.into_rgba8();
    Ok(ImageData::new(
        decoded.width(),
        decoded.height(),
        decoded.into_raw(),
    ))
}

/// Environment cube map sampled by the skybox pass and the path tracer's
/// miss shaders.
pub struct Skybox {
    pub image: Image,
    pub view: ImageView,
    pub sampler: Sampler,
    layout: Option<DescriptorSetLayout>,
    set: Option<DescriptorSet>,
}

impl Skybox {
    pub fn build_descriptor_set(
        &mut self,
        context: &Context,
        allocator: &mut DescriptorAllocatorGrowable,
    ) -> Result<()> {
        let layout = context
            .descriptor_set_layout_builder()
            .add_binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT | vk::ShaderStageFlags::MISS_KHR,
            )
            .build()?;

        let set = allocator.allocate(&layout)?;
        set.update(&[WriteDescriptorSet {
            binding: 0,
            kind: WriteDescriptorSetKind::CombinedImageSampler {
                view: &self.view,
                sampler: &self.sampler,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        }]);

        self.layout = Some(layout);
        self.set = Some(set);

        Ok(())
    }

    pub fn descriptor_set_layout(&self) -> &DescriptorSetLayout {
        self.layout
            .as_ref()
            .expect("skybox descriptor set not built yet")
    }

    pub fn descriptor_set(&self) -> &DescriptorSet {
        self.set
            .as_ref()
            .expect("skybox descriptor set not built yet")
    }
    pub fn from_environment(context: &Context, environment: &Environment) -> Result<Self> {
        let size = environment.face_size();
        let image = context.create_cubemap_image(
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::Format::R8G8B8A8_SRGB,
            size,
        )?;

        // one staged copy per face; faces are +X -X +Y -Y +Z -Z
        let face_bytes = (size * size * 4) as usize;
        let staging = context.create_buffer(
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            (face_bytes * 6) as _,
        )?;
        for (face, data) in environment.skybox_faces.iter().enumerate() {
            staging.copy_data_to_buffer_at(&data.pixels, face * face_bytes)?;
        }

        context.execute_one_time_commands(|cmd| {
            image.transition_layout(
                cmd,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::PipelineStageFlags2::NONE,
                vk::PipelineStageFlags2::TRANSFER,
            )?;
            cmd.copy_buffer_to_image_layers(
                &staging,
                &image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                0,
                6,
            );
            image.transition_layout(
                cmd,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::PipelineStageFlags2::TRANSFER,
                vk::PipelineStageFlags2::FRAGMENT_SHADER,
            )
        })??;

        let view = image.create_cubemap_view()?;
        let sampler = context.create_render_target_sampler()?;

        Ok(Self {
            image,
            view,
            sampler,
            layout: None,
            set: None,
        })
    }
}
