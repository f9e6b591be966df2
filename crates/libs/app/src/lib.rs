pub use anyhow;
pub use glam;
pub use gui;
pub use renderer;
pub use scene;
pub use vulkan;
pub use winit;

mod controls;
mod stats;
mod ui;

pub use controls::*;
pub use stats::*;
pub use ui::*;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use renderer::{MasterRenderSystem, RenderAssets, RenderConfig, Renderer};
use scene::Scene;
use vulkan::{Context, ContextBuilder, DeviceFeatures, MAX_FRAMES_IN_FLIGHT, VERSION_1_3};
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::{Window, WindowBuilder},
};

use gui::GuiContext;

/// Window options; render options live in [`RenderConfig`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    pub render: RenderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "lucerna".into(),
            width: 1280,
            height: 720,
            resizable: true,
            render: RenderConfig::default(),
        }
    }
}

/// Mutable engine state a layer may act on during its callbacks.
pub struct LayerContext<'a> {
    pub scene: &'a mut Scene,
    pub master: &'a mut MasterRenderSystem,
}

/// Capability hook replacing the original's virtual `Layer`/`Script` bases.
/// Layers run in insertion order.
pub trait Layer {
    fn on_attach(&mut self, _ctx: &mut LayerContext) {}
    fn on_update(&mut self, _ctx: &mut LayerContext, _dt: f32) {}
    fn on_event(&mut self, _event: &WindowEvent) {}
    fn on_ui(&mut self, _ui: &gui::imgui::Ui, _ctx: &mut LayerContext) {}
}

fn create_window(config: &AppConfig) -> Result<(Window, EventLoop<()>)> {
    log::debug!("Creating window and event loop");
    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title(&config.title)
        .with_inner_size(PhysicalSize::new(config.width, config.height))
        .with_resizable(config.resizable)
        .build(&event_loop)?;

    Ok((window, event_loop))
}

fn create_context(window: &Window, app_name: &str) -> Result<Arc<Context>> {
    let required_extensions = [
        "VK_KHR_swapchain",
        "VK_KHR_ray_tracing_pipeline",
        "VK_KHR_acceleration_structure",
        "VK_KHR_deferred_host_operations",
        "VK_EXT_image_2d_view_of_3d",
    ];
    let optional_extensions = ["VK_NV_ray_tracing_validation"];

    let context = ContextBuilder::new(window)
        .vulkan_version(VERSION_1_3)
        .app_name(app_name)
        .required_extensions(&required_extensions)
        .optional_extensions(&optional_extensions)
        .required_device_features(DeviceFeatures {
            ray_tracing_pipeline: true,
            acceleration_structure: true,
            runtime_descriptor_array: true,
            sampled_image_array_non_uniform_indexing: true,
            descriptor_binding_partially_bound: true,
            buffer_device_address: true,
            image_2d_view_of_3d: true,
            sampler_anisotropy: true,
            fill_mode_non_solid: true,
            synchronization2: true,
        })
        .with_raytracing_context(true)
        .build()?;

    Ok(Arc::new(context))
}

/// Builds the engine and runs the frame loop until the window closes.
pub fn run(
    config: AppConfig,
    mut scene: Scene,
    assets: RenderAssets,
    mut layers: Vec<Box<dyn Layer>>,
) -> Result<()> {
    pretty_env_logger::init();
    log::info!("Starting {}", config.title);

    let (window, event_loop) = create_window(&config)?;

    let context = create_context(&window, &config.title)?;
    let mut renderer = Renderer::new(&context, config.width, config.height)?;
    let mut master = MasterRenderSystem::new(
        context.clone(),
        &renderer,
        config.render.clone(),
        &scene.environment,
        assets,
    )?;

    let mut gui_context = GuiContext::new(
        &context,
        &context.command_pool,
        renderer.swapchain_render_pass(),
        &window,
        MAX_FRAMES_IN_FLIGHT,
    )?;
    let scene_texture_id = gui_context.register_texture(master.scene_texture());

    {
        let mut ctx = LayerContext {
            scene: &mut scene,
            master: &mut master,
        };
        for layer in layers.iter_mut() {
            layer.on_attach(&mut ctx);
        }
    }

    let mut controls = Controls::default();
    let mut frame_stats = FrameStats::default();
    let mut last_frame = Instant::now();

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        gui_context.handle_event(&window, &event);
        controls = controls.handle_event(&event);

        match event {
            Event::NewEvents(_) => {
                let now = Instant::now();
                let frame_time = now - last_frame;
                last_frame = now;

                gui_context.update_delta_time(frame_time);
                frame_stats.tick(frame_time);
            }
            Event::WindowEvent { ref event, .. } => {
                for layer in layers.iter_mut() {
                    layer.on_event(event);
                }

                match event {
                    WindowEvent::Resized(size) => {
                        log::debug!("Window resized to {}x{}", size.width, size.height);
                        renderer.request_resize(size.width, size.height);
                    }
                    WindowEvent::KeyboardInput {
                        input:
                            KeyboardInput {
                                state: ElementState::Pressed,
                                virtual_keycode: Some(VirtualKeyCode::F5),
                                ..
                            },
                        ..
                    } => {
                        master.request_shader_reload();
                    }
                    WindowEvent::CloseRequested => *control_flow = ControlFlow::Exit,
                    _ => (),
                }
            }
            Event::MainEventsCleared => {
                let dt = frame_stats.frame_time.as_secs_f32();

                // drive the main camera from the accumulated input
                if let Some(entity) = scene.main_camera_mut() {
                    let transform = entity.transform.as_mut().unwrap();
                    drive_camera(
                        &controls,
                        &mut transform.translation,
                        &mut transform.rotation,
                        dt,
                    );
                }
                controls = controls.reset();

                {
                    let mut ctx = LayerContext {
                        scene: &mut scene,
                        master: &mut master,
                    };
                    for layer in layers.iter_mut() {
                        layer.on_update(&mut ctx, dt);
                    }
                }

                if let Err(err) = draw_frame(
                    &context,
                    &window,
                    &mut renderer,
                    &mut master,
                    &mut gui_context,
                    &mut scene,
                    &mut layers,
                    &frame_stats,
                    scene_texture_id,
                    dt,
                ) {
                    panic!("Failed to draw frame: {err:#}");
                }
            }
            Event::LoopDestroyed => {
                context
                    .device_wait_idle()
                    .expect("Failed to wait for device on exit");
            }
            _ => (),
        }
    });
}

#[allow(clippy::too_many_arguments)]
fn draw_frame(
    context: &Arc<Context>,
    window: &Window,
    renderer: &mut Renderer,
    master: &mut MasterRenderSystem,
    gui_context: &mut GuiContext,
    scene: &mut Scene,
    layers: &mut [Box<dyn Layer>],
    frame_stats: &FrameStats,
    scene_texture_id: gui::imgui::TextureId,
    dt: f32,
) -> Result<()> {
    if !renderer.begin_frame(context)? {
        // swapchain was recreated; this frame is discarded
        return Ok(());
    }

    master.on_update(renderer, scene)?;

    gui_context
        .platform
        .prepare_frame(gui_context.imgui.io_mut(), window)?;
    let ui = gui_context.imgui.frame();

    build_engine_ui(&ui, master, frame_stats, scene_texture_id);
    {
        let mut ctx = LayerContext { scene, master };
        for layer in layers.iter_mut() {
            layer.on_ui(&ui, &mut ctx);
        }
    }

    gui_context.platform.prepare_render(&ui, window);
    let draw_data = gui_context.imgui.render();

    let gui_renderer = &mut gui_context.renderer;
    master.do_render_passes(renderer, scene, dt, |cmd| {
        let [w, h] = draw_data.display_size;
        if w > f32::EPSILON && h > f32::EPSILON {
            if let Err(err) = gui_renderer.cmd_draw(cmd.inner, draw_data) {
                log::error!("UI draw failed: {err:#}");
            }
        }
    })?;

    renderer.end_frame(context)?;

    master.post_frame_update()?;

    Ok(())
}
