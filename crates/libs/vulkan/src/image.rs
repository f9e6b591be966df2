use std::{
    cell::Cell,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan::AllocationScheme;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, Allocator},
    MemoryLocation,
};

use crate::{device::Device, CommandBuffer, Context};

pub struct Image {
    device: Arc<Device>,
    allocator: Arc<Mutex<Allocator>>,
    pub(crate) inner: vk::Image,
    allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub array_layers: u32,
    // layout the image will be in once all previously recorded commands that
    // touch it have executed; updated at record time, single recording thread
    current_layout: Cell<vk::ImageLayout>,
    is_swapchain: bool, // if set, image must not be destroyed
}

pub struct ImageView {
    device: Arc<Device>,
    pub(crate) inner: vk::ImageView,
}

/// Source access implied by the layout an image is leaving.
fn src_access_mask(layout: vk::ImageLayout) -> Result<vk::AccessFlags2> {
    Ok(match layout {
        vk::ImageLayout::UNDEFINED => vk::AccessFlags2::NONE,
        vk::ImageLayout::PREINITIALIZED => vk::AccessFlags2::HOST_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags2::SHADER_READ,
        vk::ImageLayout::GENERAL => vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
        _ => anyhow::bail!("Unsupported source layout for transition: {layout:?}"),
    })
}

/// Destination access implied by the layout an image is entering.
fn dst_access_mask(layout: vk::ImageLayout) -> Result<vk::AccessFlags2> {
    Ok(match layout {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags2::SHADER_READ,
        vk::ImageLayout::GENERAL => vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
        _ => anyhow::bail!("Unsupported destination layout for transition: {layout:?}"),
    })
}

pub fn aspect_mask_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT => vk::ImageAspectFlags::DEPTH,
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

impl Image {
    fn allocate(
        device: Arc<Device>,
        allocator: Arc<Mutex<Allocator>>,
        image_info: &vk::ImageCreateInfo,
        name: &'static str,
    ) -> Result<Self> {
        let inner = unsafe { device.inner.create_image(image_info, None)? };
        let requirements = unsafe { device.inner.get_image_memory_requirements(inner) };

        let allocation = allocator.lock().unwrap().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            device
                .inner
                .bind_image_memory(inner, allocation.memory(), allocation.offset())?
        };

        Ok(Self {
            device,
            allocator,
            inner,
            allocation: Some(allocation),
            format: image_info.format,
            extent: image_info.extent,
            array_layers: image_info.array_layers,
            current_layout: Cell::new(image_info.initial_layout),
            is_swapchain: false,
        })
    }

    pub(crate) fn new_2d(
        device: Arc<Device>,
        allocator: Arc<Mutex<Allocator>>,
        usage: vk::ImageUsageFlags,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        Self::allocate(device, allocator, &image_info, "image")
    }

    pub(crate) fn new_cubemap(
        device: Arc<Device>,
        allocator: Arc<Mutex<Allocator>>,
        usage: vk::ImageUsageFlags,
        format: vk::Format,
        size: u32,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: size,
                height: size,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(6)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .flags(vk::ImageCreateFlags::CUBE_COMPATIBLE);

        Self::allocate(device, allocator, &image_info, "cubemap_image")
    }

    pub(crate) fn new_3d(
        device: Arc<Device>,
        allocator: Arc<Mutex<Allocator>>,
        usage: vk::ImageUsageFlags,
        format: vk::Format,
        extent: vk::Extent3D,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_3D)
            .format(format)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            // lets debug panels show individual z-slices through 2D views
            .flags(vk::ImageCreateFlags::TYPE_2D_VIEW_COMPATIBLE_EXT);

        Self::allocate(device, allocator, &image_info, "image_3d")
    }

    pub(crate) fn from_swapchain_image(
        device: Arc<Device>,
        allocator: Arc<Mutex<Allocator>>,
        swapchain_image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Self {
        let extent = vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        };

        Self {
            device,
            allocator,
            inner: swapchain_image,
            allocation: None,
            format,
            extent,
            array_layers: 1,
            current_layout: Cell::new(vk::ImageLayout::UNDEFINED),
            is_swapchain: true,
        }
    }

    pub fn current_layout(&self) -> vk::ImageLayout {
        self.current_layout.get()
    }

    /// Only for swapchain images whose layout is driven by render-pass final
    /// layouts rather than explicit barriers.
    pub(crate) fn set_current_layout(&self, layout: vk::ImageLayout) {
        self.current_layout.set(layout);
    }

    pub fn full_subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: aspect_mask_for_format(self.format),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }

    /// Emits an image memory barrier from the tracked layout to `new_layout`
    /// and updates the tracked layout. Access masks come from a fixed table;
    /// a layout outside that table is a programmer error.
    pub fn transition_layout(
        &self,
        cmd: &CommandBuffer,
        new_layout: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags2,
        dst_stage: vk::PipelineStageFlags2,
    ) -> Result<()> {
        self.transition_layout_range(
            cmd,
            new_layout,
            src_stage,
            dst_stage,
            self.full_subresource_range(),
        )
    }

    pub fn transition_layout_range(
        &self,
        cmd: &CommandBuffer,
        new_layout: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags2,
        dst_stage: vk::PipelineStageFlags2,
        subresource_range: vk::ImageSubresourceRange,
    ) -> Result<()> {
        let old_layout = self.current_layout.get();

        let barrier = vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(src_stage)
            .src_access_mask(src_access_mask(old_layout)?)
            .old_layout(old_layout)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access_mask(new_layout)?)
            .new_layout(new_layout)
            .image(self.inner)
            .subresource_range(subresource_range);

        let dependency_info =
            vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&barrier));

        unsafe {
            self.device
                .inner
                .cmd_pipeline_barrier2(cmd.inner, &dependency_info)
        };

        self.current_layout.set(new_layout);

        Ok(())
    }

    /// Same transition recorded on a one-shot command buffer; blocks until
    /// the queue has executed it.
    pub fn transition_layout_blocking(
        &self,
        context: &Context,
        new_layout: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags2,
        dst_stage: vk::PipelineStageFlags2,
    ) -> Result<()> {
        context.execute_one_time_commands(|cmd| {
            self.transition_layout(cmd, new_layout, src_stage, dst_stage)
        })?
    }

    pub fn create_image_view(&self) -> Result<ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.inner)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask_for_format(self.format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let inner = unsafe { self.device.inner.create_image_view(&view_info, None)? };

        Ok(ImageView {
            device: self.device.clone(),
            inner,
        })
    }

    pub fn create_3d_view(&self) -> Result<ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.inner)
            .view_type(vk::ImageViewType::TYPE_3D)
            .format(self.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let inner = unsafe { self.device.inner.create_image_view(&view_info, None)? };

        Ok(ImageView {
            device: self.device.clone(),
            inner,
        })
    }

    /// 2D view of one z-slice of a 3D image (`image_2d_view_of_3d` feature).
    pub fn create_slice_view(&self, slice: u32) -> Result<ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.inner)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: slice,
                layer_count: 1,
            });

        let inner = unsafe { self.device.inner.create_image_view(&view_info, None)? };

        Ok(ImageView {
            device: self.device.clone(),
            inner,
        })
    }

    pub fn create_cubemap_view(&self) -> Result<ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.inner)
            .view_type(vk::ImageViewType::CUBE)
            .format(self.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask_for_format(self.format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 6,
            });

        let inner = unsafe { self.device.inner.create_image_view(&view_info, None)? };

        Ok(ImageView {
            device: self.device.clone(),
            inner,
        })
    }

    /// View of a single cube face, used as a framebuffer attachment.
    pub fn create_face_view(&self, face: u32) -> Result<ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.inner)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask_for_format(self.format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: face,
                layer_count: 1,
            });

        let inner = unsafe { self.device.inner.create_image_view(&view_info, None)? };

        Ok(ImageView {
            device: self.device.clone(),
            inner,
        })
    }
}

impl Context {
    pub fn create_image(
        &self,
        usage: vk::ImageUsageFlags,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> Result<Image> {
        Image::new_2d(
            self.device.clone(),
            self.allocator.clone(),
            usage,
            format,
            width,
            height,
        )
    }

    pub fn create_cubemap_image(
        &self,
        usage: vk::ImageUsageFlags,
        format: vk::Format,
        size: u32,
    ) -> Result<Image> {
        Image::new_cubemap(
            self.device.clone(),
            self.allocator.clone(),
            usage,
            format,
            size,
        )
    }

    pub fn create_image_3d(
        &self,
        usage: vk::ImageUsageFlags,
        format: vk::Format,
        extent: vk::Extent3D,
    ) -> Result<Image> {
        Image::new_3d(
            self.device.clone(),
            self.allocator.clone(),
            usage,
            format,
            extent,
        )
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if self.is_swapchain {
            return;
        }

        unsafe { self.device.inner.destroy_image(self.inner, None) };
        self.allocator
            .lock()
            .unwrap()
            .free(self.allocation.take().unwrap())
            .unwrap();
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_image_view(self.inner, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_masks_cover_the_documented_layouts() {
        let layouts = [
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::PREINITIALIZED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::GENERAL,
        ];
        for layout in layouts {
            assert!(src_access_mask(layout).is_ok(), "src mask for {layout:?}");
        }
        for layout in &layouts[2..] {
            assert!(dst_access_mask(*layout).is_ok(), "dst mask for {layout:?}");
        }
    }

    #[test]
    fn unknown_layout_transition_is_rejected() {
        assert!(src_access_mask(vk::ImageLayout::PRESENT_SRC_KHR).is_err());
        assert!(dst_access_mask(vk::ImageLayout::UNDEFINED).is_err());
    }

    #[test]
    fn depth_formats_get_depth_aspects() {
        assert_eq!(
            aspect_mask_for_format(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_mask_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_mask_for_format(vk::Format::R16G16B16A16_SFLOAT),
            vk::ImageAspectFlags::COLOR
        );
    }
}
