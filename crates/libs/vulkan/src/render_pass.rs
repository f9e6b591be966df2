use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::{device::Device, Context, ImageView};

pub struct RenderPass {
    device: Arc<Device>,
    pub(crate) inner: vk::RenderPass,
}

impl RenderPass {
    pub(crate) fn new(device: Arc<Device>, create_info: &vk::RenderPassCreateInfo) -> Result<Self> {
        let inner = unsafe { device.inner.create_render_pass(create_info, None)? };

        Ok(Self { device, inner })
    }

    /// Raw handle for integrations that record into this pass themselves
    /// (the UI renderer).
    pub fn as_raw(&self) -> vk::RenderPass {
        self.inner
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_render_pass(self.inner, None) };
    }
}

pub struct Framebuffer {
    device: Arc<Device>,
    pub(crate) inner: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

impl Framebuffer {
    pub(crate) fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        attachments: &[&ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let attachments = attachments.iter().map(|a| a.inner).collect::<Vec<_>>();

        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.inner)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let inner = unsafe { device.inner.create_framebuffer(&create_info, None)? };

        Ok(Self {
            device,
            inner,
            extent,
        })
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_framebuffer(self.inner, None) };
    }
}

impl Context {
    pub fn create_render_pass(&self, create_info: &vk::RenderPassCreateInfo) -> Result<RenderPass> {
        RenderPass::new(self.device.clone(), create_info)
    }

    pub fn create_framebuffer(
        &self,
        render_pass: &RenderPass,
        attachments: &[&ImageView],
        extent: vk::Extent2D,
    ) -> Result<Framebuffer> {
        Framebuffer::new(self.device.clone(), render_pass, attachments, extent)
    }
}
