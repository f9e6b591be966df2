use anyhow::Result;
use vulkan::ash::vk;
use vulkan::{
    AcquiredImage, CommandBuffer, Context, Framebuffer, RenderPass, Swapchain,
    MAX_FRAMES_IN_FLIGHT,
};

use crate::RenderError;

/// Frame pacing around the swapchain: acquires an image, hands out the
/// per-frame command buffer, submits and presents, and drives swapchain
/// recreation on resize or staleness. A frame whose acquire fails is
/// discarded, never partially submitted.
pub struct Renderer {
    swapchain: Swapchain,
    swapchain_render_pass: RenderPass,
    swapchain_framebuffers: Vec<Framebuffer>,
    command_buffers: Vec<CommandBuffer>,
    current_image_index: u32,
    is_frame_started: bool,
    pending_resize: Option<(u32, u32)>,
}

impl Renderer {
    pub fn new(context: &Context, width: u32, height: u32) -> Result<Self> {
        let swapchain = Swapchain::new(context, width, height)?;
        let swapchain_render_pass = create_swapchain_render_pass(context, swapchain.format)?;
        let swapchain_framebuffers =
            create_framebuffers(context, &swapchain_render_pass, &swapchain)?;

        let command_buffers = context.command_pool.allocate_command_buffers(
            vk::CommandBufferLevel::PRIMARY,
            MAX_FRAMES_IN_FLIGHT as _,
        )?;

        Ok(Self {
            swapchain,
            swapchain_render_pass,
            swapchain_framebuffers,
            command_buffers,
            current_image_index: 0,
            is_frame_started: false,
            pending_resize: None,
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent.width as f32 / self.swapchain.extent.height as f32
    }

    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain.format
    }

    pub fn swapchain_render_pass(&self) -> &RenderPass {
        &self.swapchain_render_pass
    }

    /// Index of the frame slot currently being recorded.
    pub fn frame_index(&self) -> usize {
        self.swapchain.current_frame()
    }

    pub fn current_command_buffer(&self) -> &CommandBuffer {
        assert!(self.is_frame_started, "no frame in flight");
        &self.command_buffers[self.frame_index()]
    }

    /// Signals that the window changed size; the swapchain is rebuilt at the
    /// start of the next frame.
    pub fn request_resize(&mut self, width: u32, height: u32) {
        self.pending_resize = Some((width, height));
    }

    /// Waits for this frame slot's fence, acquires a swapchain image and
    /// opens the command buffer. Returns `false` when the frame must be
    /// skipped because the swapchain was recreated.
    pub fn begin_frame(&mut self, context: &Context) -> Result<bool> {
        assert!(!self.is_frame_started, "frame already started");

        if let Some((width, height)) = self.pending_resize.take() {
            self.recreate_swapchain(context, width, height)?;
        }

        let acquired = match self.swapchain.acquire_next_image() {
            Ok(AcquiredImage { index, .. }) => index,
            Err(err) => match RenderError::classify(err) {
                RenderError::SwapchainOutOfDate => {
                    let extent = self.swapchain.extent;
                    self.recreate_swapchain(context, extent.width, extent.height)?;
                    return Ok(false);
                }
                other => return Err(other.into()),
            },
        };

        self.current_image_index = acquired;
        self.is_frame_started = true;

        let cmd = &self.command_buffers[self.frame_index()];
        cmd.reset()?;
        cmd.begin(None)?;

        Ok(true)
    }

    /// Closes and submits the command buffer, then presents.
    pub fn end_frame(&mut self, context: &Context) -> Result<()> {
        assert!(self.is_frame_started, "no frame to end");

        let cmd = &self.command_buffers[self.frame_index()];
        cmd.end()?;

        let present_result = self.swapchain.submit_and_present(
            cmd,
            self.current_image_index,
            &context.graphics_queue,
            &context.present_queue,
        );

        self.is_frame_started = false;

        match present_result {
            Ok(false) => Ok(()),
            Ok(true) => {
                // suboptimal: recreate before the next frame
                let extent = self.swapchain.extent;
                self.recreate_swapchain(context, extent.width, extent.height)
            }
            Err(err) => match RenderError::classify(err) {
                RenderError::SwapchainOutOfDate => {
                    let extent = self.swapchain.extent;
                    self.recreate_swapchain(context, extent.width, extent.height)
                }
                other => Err(other.into()),
            },
        }
    }

    /// The presentation pass the UI records into; clears the swapchain image.
    pub fn begin_swapchain_render_pass(&self, cmd: &CommandBuffer) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.01, 0.01, 0.01, 1.0],
            },
        }];

        cmd.begin_render_pass(
            &self.swapchain_render_pass,
            &self.swapchain_framebuffers[self.current_image_index as usize],
            self.swapchain.extent,
            &clear_values,
        );
    }

    pub fn end_swapchain_render_pass(&self, cmd: &CommandBuffer) {
        cmd.end_render_pass();
    }

    fn recreate_swapchain(&mut self, context: &Context, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            // minimized; keep the old swapchain until a real size arrives
            self.pending_resize = Some((width, height));
            return Ok(());
        }

        context.device_wait_idle()?;

        self.swapchain_framebuffers.clear();
        self.swapchain.resize(context, width, height)?;
        self.swapchain_framebuffers =
            create_framebuffers(context, &self.swapchain_render_pass, &self.swapchain)?;

        Ok(())
    }
}

fn create_swapchain_render_pass(context: &Context, format: vk::Format) -> Result<RenderPass> {
    let attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };

    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_ref))
        .build();

    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(std::slice::from_ref(&attachment))
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));

    context.create_render_pass(&create_info)
}

fn create_framebuffers(
    context: &Context,
    render_pass: &RenderPass,
    swapchain: &Swapchain,
) -> Result<Vec<Framebuffer>> {
    swapchain
        .views
        .iter()
        .map(|view| context.create_framebuffer(render_pass, &[view], swapchain.extent))
        .collect()
}
