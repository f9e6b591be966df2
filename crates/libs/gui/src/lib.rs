pub extern crate imgui;
pub extern crate imgui_rs_vulkan_renderer;
pub extern crate imgui_winit_support;

use std::time::Duration;

use anyhow::Result;
use imgui::{Context, DrawData, FontConfig, FontSource, TextureId};
use imgui_winit_support::{HiDpiMode, WinitPlatform};
use vulkan::{ash::vk, CommandBuffer, CommandPool, Context as VkContext, RenderPass};
use winit::{event::Event, window::Window};

pub struct GuiContext {
    pub imgui: Context,
    pub platform: WinitPlatform,
    pub renderer: imgui_rs_vulkan_renderer::Renderer,
}

impl GuiContext {
    pub fn new(
        context: &VkContext,
        command_pool: &CommandPool,
        render_pass: &RenderPass,
        window: &Window,
        in_flight_frames: usize,
    ) -> Result<Self> {
        let mut imgui = Context::create();
        imgui.set_ini_filename(None);

        let mut platform = WinitPlatform::init(&mut imgui);

        let hidpi_factor = platform.hidpi_factor();
        let font_size = (13.0 * hidpi_factor) as f32;
        imgui.fonts().add_font(&[FontSource::DefaultFontData {
            config: Some(FontConfig {
                size_pixels: font_size,
                ..FontConfig::default()
            }),
        }]);
        imgui.io_mut().font_global_scale = (1.0 / hidpi_factor) as f32;
        platform.attach_window(imgui.io_mut(), window, HiDpiMode::Rounded);

        let gui_renderer = imgui_rs_vulkan_renderer::Renderer::with_gpu_allocator(
            context.allocator.clone(),
            context.device.inner.clone(),
            context.graphics_queue.inner,
            command_pool.inner,
            render_pass.as_raw(),
            &mut imgui,
            Some(imgui_rs_vulkan_renderer::Options {
                in_flight_frames,
                ..Default::default()
            }),
        )?;

        Ok(Self {
            imgui,
            platform,
            renderer: gui_renderer,
        })
    }

    /// Makes a descriptor set drawable through `imgui::Image`; the caller
    /// keeps the set alive for as long as the id is used.
    pub fn register_texture(&mut self, set: vk::DescriptorSet) -> TextureId {
        self.renderer.textures().insert(set)
    }

    pub fn handle_event<T>(&mut self, window: &Window, event: &Event<T>) {
        self.platform
            .handle_event(self.imgui.io_mut(), window, event);
    }

    pub fn update_delta_time(&mut self, delta: Duration) {
        self.imgui.io_mut().update_delta_time(delta);
    }

    pub fn cmd_draw(&mut self, buffer: &CommandBuffer, draw_data: &DrawData) -> Result<()> {
        self.renderer.cmd_draw(buffer.inner, draw_data)?;

        Ok(())
    }
}

/// Fits an image into an available region while keeping its aspect ratio;
/// used by the viewport panel that shows the scene image.
pub fn fit_to_region(region: [f32; 2], aspect_ratio: f32) -> [f32; 2] {
    let width_based_on_height = region[1] * aspect_ratio;

    if width_based_on_height > region[0] {
        [region[0], region[0] / aspect_ratio]
    } else {
        [width_based_on_height, region[1]]
    }
}

#[cfg(test)]
mod tests {
    use super::fit_to_region;

    #[test]
    fn wide_image_is_limited_by_region_width() {
        let fitted = fit_to_region([100.0, 100.0], 2.0);
        assert_eq!(fitted, [100.0, 50.0]);
    }

    #[test]
    fn tall_region_is_limited_by_height() {
        let fitted = fit_to_region([400.0, 100.0], 16.0 / 9.0);
        assert!((fitted[1] - 100.0).abs() < f32::EPSILON);
        assert!(fitted[0] < 400.0);
    }

    #[test]
    fn exact_fit_fills_the_region() {
        let fitted = fit_to_region([160.0, 90.0], 16.0 / 9.0);
        assert_eq!(fitted, [160.0, 90.0]);
    }
}
