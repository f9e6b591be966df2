use std::sync::Arc;

use anyhow::Result;
use ash::{extensions::khr::Swapchain as AshSwapchain, vk};

use crate::{
    device::Device, CommandBuffer, Context, Fence, Image, ImageView, Queue, Semaphore,
    SemaphoreSubmitInfo, MAX_FRAMES_IN_FLIGHT,
};

pub struct AcquiredImage {
    pub index: u32,
    pub is_suboptimal: bool,
}

/// Swapchain plus the per-frame synchronization it implies.
///
/// `image_available` and `in_flight` are indexed by `current_frame`
/// (mod `MAX_FRAMES_IN_FLIGHT`); `render_finished` is indexed by the acquired
/// image index, one semaphore per swapchain image, so a semaphore is never
/// reused while the presentation engine still waits on it.
pub struct Swapchain {
    device: Arc<Device>,
    inner: AshSwapchain,
    swapchain_khr: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub images: Vec<Image>,
    pub views: Vec<ImageView>,
    image_available_semaphores: Vec<Semaphore>,
    render_finished_semaphores: Vec<Semaphore>,
    in_flight_fences: Vec<Fence>,
    current_frame: usize,
}

fn choose_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
        return vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
    }

    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| {
            formats.iter().find(|f| {
                f.format == vk::Format::B8G8R8A8_UNORM
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .copied()
        .unwrap_or(formats[0])
}

fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        let min = capabilities.min_image_extent;
        let max = capabilities.max_image_extent;
        let width = width.min(max.width).max(min.width);
        let height = height.min(max.height).max(min.height);
        vk::Extent2D { width, height }
    }
}

impl Swapchain {
    pub fn new(context: &Context, width: u32, height: u32) -> Result<Self> {
        log::debug!("Creating vulkan swapchain");

        let device = context.device.clone();

        let formats = unsafe {
            context.surface.inner.get_physical_device_surface_formats(
                context.physical_device.inner,
                context.surface.surface_khr,
            )?
        };
        let format = choose_format(&formats);
        log::debug!("Swapchain format: {format:?}");

        let present_modes = unsafe {
            context
                .surface
                .inner
                .get_physical_device_surface_present_modes(
                    context.physical_device.inner,
                    context.surface.surface_khr,
                )?
        };
        let present_mode = choose_present_mode(&present_modes);
        log::debug!("Swapchain present mode: {present_mode:?}");

        let capabilities = unsafe {
            context
                .surface
                .inner
                .get_physical_device_surface_capabilities(
                    context.physical_device.inner,
                    context.surface.surface_khr,
                )?
        };

        let extent = choose_extent(&capabilities, width, height);
        log::debug!("Swapchain extent: {extent:?}");

        let image_count = capabilities.min_image_count + 1;

        let families_indices = [
            context.graphics_queue_family.index,
            context.present_queue_family.index,
        ];

        let create_info = {
            let mut builder = vk::SwapchainCreateInfoKHR::builder()
                .surface(context.surface.surface_khr)
                .min_image_count(image_count)
                .image_format(format.format)
                .image_color_space(format.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
                );

            builder = if context.graphics_queue_family.index != context.present_queue_family.index {
                builder
                    .image_sharing_mode(vk::SharingMode::CONCURRENT)
                    .queue_family_indices(&families_indices)
            } else {
                builder.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            };

            builder
                .pre_transform(capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(present_mode)
                .clipped(true)
        };

        let inner = AshSwapchain::new(&context.instance.inner, &context.device.inner);
        let swapchain_khr = unsafe { inner.create_swapchain(&create_info, None)? };

        let images = unsafe { inner.get_swapchain_images(swapchain_khr)? };
        let images = images
            .into_iter()
            .map(|i| {
                Image::from_swapchain_image(
                    device.clone(),
                    context.allocator.clone(),
                    i,
                    format.format,
                    extent,
                )
            })
            .collect::<Vec<_>>();

        let views = images
            .iter()
            .map(Image::create_image_view)
            .collect::<Result<Vec<_>, _>>()?;

        let image_available_semaphores = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| context.create_semaphore())
            .collect::<Result<Vec<_>>>()?;
        let render_finished_semaphores = (0..images.len())
            .map(|_| context.create_semaphore())
            .collect::<Result<Vec<_>>>()?;
        let in_flight_fences = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| context.create_fence(Some(vk::FenceCreateFlags::SIGNALED)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device,
            inner,
            swapchain_khr,
            extent,
            format: format.format,
            color_space: format.color_space,
            present_mode,
            images,
            views,
            image_available_semaphores,
            render_finished_semaphores,
            in_flight_fences,
            current_frame: 0,
        })
    }

    /// Rejects format or color-space drift across a recreation; pipelines and
    /// render passes are keyed to the original format.
    pub fn compare_formats(&self, format: vk::Format, color_space: vk::ColorSpaceKHR) -> bool {
        self.format == format && self.color_space == color_space
    }

    /// Recreates the swapchain for a new extent. The caller must have waited
    /// for the device to go idle.
    pub fn resize(&mut self, context: &Context, width: u32, height: u32) -> Result<()> {
        log::debug!("Resizing vulkan swapchain to {width}x{height}");

        self.destroy();

        let formats = unsafe {
            context.surface.inner.get_physical_device_surface_formats(
                context.physical_device.inner,
                context.surface.surface_khr,
            )?
        };
        let format = choose_format(&formats);
        if !self.compare_formats(format.format, format.color_space) {
            anyhow::bail!(
                "Swapchain format drifted across recreation: {:?}/{:?} -> {:?}/{:?}",
                self.format,
                self.color_space,
                format.format,
                format.color_space,
            );
        }

        let capabilities = unsafe {
            context
                .surface
                .inner
                .get_physical_device_surface_capabilities(
                    context.physical_device.inner,
                    context.surface.surface_khr,
                )?
        };

        let extent = choose_extent(&capabilities, width, height);
        log::debug!("Swapchain extent: {extent:?}");

        let image_count = capabilities.min_image_count + 1;

        let families_indices = [
            context.graphics_queue_family.index,
            context.present_queue_family.index,
        ];

        let create_info = {
            let mut builder = vk::SwapchainCreateInfoKHR::builder()
                .surface(context.surface.surface_khr)
                .min_image_count(image_count)
                .image_format(self.format)
                .image_color_space(self.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
                );

            builder = if context.graphics_queue_family.index != context.present_queue_family.index {
                builder
                    .image_sharing_mode(vk::SharingMode::CONCURRENT)
                    .queue_family_indices(&families_indices)
            } else {
                builder.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            };

            builder
                .pre_transform(capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(self.present_mode)
                .clipped(true)
        };

        let swapchain_khr = unsafe { self.inner.create_swapchain(&create_info, None)? };

        let images = unsafe { self.inner.get_swapchain_images(swapchain_khr)? };
        let images = images
            .into_iter()
            .map(|i| {
                Image::from_swapchain_image(
                    self.device.clone(),
                    context.allocator.clone(),
                    i,
                    self.format,
                    extent,
                )
            })
            .collect::<Vec<_>>();

        let views = images
            .iter()
            .map(Image::create_image_view)
            .collect::<Result<Vec<_>, _>>()?;

        if images.len() != self.render_finished_semaphores.len() {
            self.render_finished_semaphores = (0..images.len())
                .map(|_| context.create_semaphore())
                .collect::<Result<Vec<_>>>()?;
        }

        self.swapchain_khr = swapchain_khr;
        self.extent = extent;
        self.images = images;
        self.views = views;

        Ok(())
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Blocks until the fence for the current frame slot is signalled, then
    /// asks the presentation engine for the next image. Everything indexed by
    /// `current_frame()` is idle once this returns.
    pub fn acquire_next_image(&self) -> Result<AcquiredImage> {
        self.in_flight_fences[self.current_frame].wait(None)?;

        let (index, is_suboptimal) = unsafe {
            self.inner.acquire_next_image(
                self.swapchain_khr,
                u64::MAX,
                self.image_available_semaphores[self.current_frame].inner,
                vk::Fence::null(),
            )?
        };

        Ok(AcquiredImage {
            index,
            is_suboptimal,
        })
    }

    /// Submits the frame's command buffer and queues the present. Returns
    /// `true` when the swapchain is suboptimal and should be recreated.
    pub fn submit_and_present(
        &mut self,
        command_buffer: &CommandBuffer,
        image_index: u32,
        graphics_queue: &Queue,
        present_queue: &Queue,
    ) -> Result<bool> {
        let fence = &self.in_flight_fences[self.current_frame];
        fence.reset()?;

        graphics_queue.submit(
            command_buffer,
            Some(SemaphoreSubmitInfo {
                semaphore: &self.image_available_semaphores[self.current_frame],
                stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            }),
            Some(SemaphoreSubmitInfo {
                semaphore: &self.render_finished_semaphores[image_index as usize],
                stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            }),
            fence,
        )?;

        let swapchains = [self.swapchain_khr];
        let images_indices = [image_index];
        let wait_semaphores = [self.render_finished_semaphores[image_index as usize].inner];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&images_indices);

        let is_suboptimal =
            unsafe { self.inner.queue_present(present_queue.inner, &present_info)? };

        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;

        Ok(is_suboptimal)
    }

    fn destroy(&mut self) {
        unsafe {
            self.views.clear();
            self.images.clear();
            self.inner.destroy_swapchain(self.swapchain_khr, None);
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}
